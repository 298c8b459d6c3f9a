//! `ark-worker`: the preservation process.
//!
//! Loads configuration from the environment, wires the pipeline to
//! PostgreSQL and the configured backup store, and exposes the operator
//! subcommands.

pub mod cli;
pub mod config;
pub mod services;

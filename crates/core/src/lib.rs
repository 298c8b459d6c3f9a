//! Shared domain model for the preservation core.
//!
//! Everything the stores, the backup backends and the pipeline agree on
//! lives here: identifiers, checksums, the preservation record, fixity
//! events, audits, and the port traits that the rest of the workspace
//! implements.

pub mod audit;
pub mod batch;
pub mod error;
pub mod fixity;
pub mod hashing;
pub mod live;
pub mod notification;
pub mod object;
pub mod paths;
pub mod ports;
pub mod preservation;
pub mod types;
pub mod version;

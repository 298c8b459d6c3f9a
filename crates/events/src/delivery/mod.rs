//! Notifier implementations for operator-facing audit notifications.

pub mod email;
pub mod log;
pub mod memory;

//! Row models and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` entity struct matching the database row
//! - Create DTOs for inserts where the table has any
//! - Conversions into the `ark_core` domain types

pub mod audit;
pub mod batch;
pub mod channel_message;
pub mod fixity_event;
pub mod live_object;
pub mod preservation_record;
pub mod status;

use ark_core::error::StoreError;

/// Parse a TEXT enum column into its domain type.
pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error returned by every store-like port (records, events, audits,
/// batches, the message channel and the notification sink).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Callers that race on
    /// creation treat this as "someone else won" and re-read.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// The payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing service is unavailable or failed. Transient; the
    /// surrounding retry policy decides what happens next.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Wrap any displayable backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error returned by [`BackupStore`](crate::ports::BackupStore) backends.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Preserved copy not found: {0}")]
    NotFound(String),

    /// The backend's integrity check rejected the write because the bytes
    /// it received do not hash to the checksum the caller expected.
    #[error("Checksum rejected for {location}: expected {expected}, got {actual}")]
    ChecksumRejected {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("Unsupported location '{0}'")]
    InvalidLocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl BackupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

use ark_core::error::{BackupError, CoreError, StoreError};
use ark_core::types::DbId;

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PreservationError {
    #[error("Live object not found: {0}")]
    LiveObjectNotFound(DbId),

    #[error("Preservation record not found: {0}")]
    RecordNotFound(DbId),

    /// The local file no longer hashes to the checksum the live store
    /// recorded for it. Nothing is uploaded.
    #[error("Local checksum mismatch for binary {binary_id} at {path}: recorded {expected}, found {actual}")]
    LocalChecksumMismatch {
        binary_id: DbId,
        path: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PreservationError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

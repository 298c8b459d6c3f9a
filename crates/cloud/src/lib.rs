//! Backup store backends for preserved copies.
//!
//! - [`LocalBackupStore`]: a directory tree, `file://` locations.
//! - [`S3BackupStore`]: an S3 bucket, `s3://bucket/key` locations.
//! - [`MemoryBackupStore`]: process-local, for tests and dry runs.
//!
//! [`connect`] picks one from a [`BackupConfig`].

use std::sync::Arc;

use ark_core::error::BackupError;
use ark_core::ports::BackupStore;

pub mod config;
pub mod local;
pub mod memory;
pub mod s3;

pub use config::{BackupBackend, BackupConfig};
pub use local::LocalBackupStore;
pub use memory::MemoryBackupStore;
pub use s3::S3BackupStore;

/// Build the configured backend.
pub async fn connect(config: &BackupConfig) -> Result<Arc<dyn BackupStore>, BackupError> {
    let store: Arc<dyn BackupStore> = match config.backend {
        BackupBackend::Local => Arc::new(LocalBackupStore::new(&config.root, config.versioned)?),
        BackupBackend::S3 => {
            let bucket = config.bucket.clone().ok_or_else(|| {
                BackupError::Backend("BACKUP_BUCKET is required for the s3 backend".into())
            })?;
            Arc::new(S3BackupStore::from_env(bucket, config.prefix.clone(), config.versioned).await)
        }
        BackupBackend::Memory => Arc::new(MemoryBackupStore::new(config.versioned)),
    };
    tracing::info!(
        backend = config.backend.name(),
        versioned = config.versioned,
        "Backup store ready"
    );
    Ok(store)
}

/// Reject keys that could escape the backend's namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), BackupError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(BackupError::InvalidLocation(key.to_string()));
    }
    Ok(())
}

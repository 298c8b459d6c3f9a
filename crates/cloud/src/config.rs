//! Backup backend configuration loaded from the environment.

use std::path::PathBuf;

/// Default root for the local backend.
const DEFAULT_ROOT: &str = "./preservation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupBackend {
    Local,
    S3,
    Memory,
}

impl BackupBackend {
    /// Parse from the `BACKUP_BACKEND` value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "local" => Some(Self::Local),
            "s3" => Some(Self::S3),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backend: BackupBackend,
    /// Directory for the local backend.
    pub root: PathBuf,
    /// Bucket for the s3 backend.
    pub bucket: Option<String>,
    /// Key prefix prepended to every object key in the bucket.
    pub prefix: String,
    /// Versioned stores keep blobs when objects are deleted.
    pub versioned: bool,
}

impl BackupConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable           | Default          |
    /// |--------------------|------------------|
    /// | `BACKUP_BACKEND`   | `local`          |
    /// | `BACKUP_ROOT`      | `./preservation` |
    /// | `BACKUP_BUCKET`    | none             |
    /// | `BACKUP_PREFIX`    | empty            |
    /// | `BACKUP_VERSIONED` | `false`          |
    ///
    /// An unrecognised backend name falls back to `local` with a warning.
    pub fn from_env() -> Self {
        let backend = match std::env::var("BACKUP_BACKEND") {
            Ok(name) => BackupBackend::from_name(&name).unwrap_or_else(|| {
                tracing::warn!(backend = %name, "Unknown BACKUP_BACKEND, using local");
                BackupBackend::Local
            }),
            Err(_) => BackupBackend::Local,
        };
        Self {
            backend,
            root: std::env::var("BACKUP_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT)),
            bucket: std::env::var("BACKUP_BUCKET").ok(),
            prefix: std::env::var("BACKUP_PREFIX").unwrap_or_default(),
            versioned: std::env::var("BACKUP_VERSIONED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}

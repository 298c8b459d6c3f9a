//! Filesystem backup backend.
//!
//! Blobs land under a root directory at their shard key. Writes go to a
//! temporary sibling first and are renamed into place only after the
//! received bytes hash to the expected SHA-256, so a rejected upload never
//! replaces a good copy.

use std::path::{Path, PathBuf};

use ark_core::error::BackupError;
use ark_core::hashing::{ChecksumHasher, Checksums};
use ark_core::ports::{BackupStore, BlobSource, StoredBlob};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::validate_key;

const SCHEME: &str = "file://";
const COPY_CHUNK: usize = 64 * 1024;

pub struct LocalBackupStore {
    root: PathBuf,
    versioned: bool,
}

impl LocalBackupStore {
    /// Create the root directory if needed and resolve it to an absolute path.
    pub fn new(root: &Path, versioned: bool) -> Result<Self, BackupError> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root, versioned })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location(path: &Path) -> String {
        format!("{SCHEME}{}", path.display())
    }

    /// Map a `file://` location back to a path inside the root.
    fn resolve(&self, location: &str) -> Result<PathBuf, BackupError> {
        let path = location
            .strip_prefix(SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| BackupError::InvalidLocation(location.to_string()))?;
        if !path.starts_with(&self.root) {
            return Err(BackupError::InvalidLocation(location.to_string()));
        }
        Ok(path)
    }
}

/// Stream `src` into `dst`, hashing as it goes.
async fn copy_hashing(src: &Path, dst: &Path) -> Result<(Checksums, u64), BackupError> {
    let mut reader = tokio::fs::File::open(src).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackupError::NotFound(src.display().to_string())
        } else {
            BackupError::Io(e)
        }
    })?;
    let mut writer = tokio::fs::File::create(dst).await?;
    let mut hasher = ChecksumHasher::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;
    writer.sync_all().await?;
    Ok(hasher.finalize())
}

#[async_trait]
impl BackupStore for LocalBackupStore {
    async fn put(
        &self,
        key: &str,
        source: BlobSource,
        expected_sha256: Option<&str>,
    ) -> Result<StoredBlob, BackupError> {
        validate_key(key)?;
        let path = self.root.join(key);
        let location = Self::location(&path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        let written = match source {
            BlobSource::Bytes(bytes) => {
                let result = tokio::fs::write(&tmp, &bytes).await;
                result
                    .map(|_| (Checksums::compute(&bytes), bytes.len() as u64))
                    .map_err(BackupError::Io)
            }
            BlobSource::File(src) => copy_hashing(&src, &tmp).await,
        };
        let (checksums, size) = match written {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected_sha256 {
            if !checksums.matches_sha256(expected) {
                let _ = tokio::fs::remove_file(&tmp).await;
                tracing::warn!(%location, expected, actual = %checksums.sha256, "Rejected upload");
                return Err(BackupError::ChecksumRejected {
                    location,
                    expected: expected.to_string(),
                    actual: checksums.sha256,
                });
            }
        }

        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(%location, size, "Stored blob");
        Ok(StoredBlob {
            location,
            size: size as i64,
        })
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, BackupError> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::NotFound(location.to_string())
            } else {
                BackupError::Io(e)
            }
        })
    }

    async fn exists(&self, location: &str) -> Result<bool, BackupError> {
        let path = self.resolve(location)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, location: &str) -> Result<(), BackupError> {
        let path = self.resolve(location)?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::NotFound(location.to_string())
            } else {
                BackupError::Io(e)
            }
        })
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

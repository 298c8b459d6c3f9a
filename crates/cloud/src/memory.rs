//! In-process backup backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use ark_core::error::BackupError;
use ark_core::hashing::sha256_hex;
use ark_core::ports::{BackupStore, BlobSource, StoredBlob};
use async_trait::async_trait;

use crate::validate_key;

const SCHEME: &str = "mem://";

/// Keeps blobs in a map keyed by location. Exposes hooks to corrupt or drop
/// copies and to make writes fail.
#[derive(Default)]
pub struct MemoryBackupStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    versioned: bool,
}

impl MemoryBackupStore {
    pub fn new(versioned: bool) -> Self {
        Self {
            versioned,
            ..Self::default()
        }
    }

    /// Successful writes so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Overwrite a stored blob in place, bypassing integrity checks.
    pub fn corrupt(&self, location: &str, bytes: &[u8]) -> bool {
        match self.lock().get_mut(location) {
            Some(blob) => {
                *blob = bytes.to_vec();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, location: &str) -> bool {
        self.lock().remove(location).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Make subsequent writes fail with a backend error.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn put(
        &self,
        key: &str,
        source: BlobSource,
        expected_sha256: Option<&str>,
    ) -> Result<StoredBlob, BackupError> {
        validate_key(key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BackupError::Backend("memory store is refusing writes".into()));
        }
        let location = format!("{SCHEME}{key}");
        let bytes = match source {
            BlobSource::Bytes(bytes) => bytes,
            BlobSource::File(path) => tokio::fs::read(&path).await?,
        };
        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(BackupError::ChecksumRejected {
                    location,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        let size = bytes.len() as i64;
        self.lock().insert(location.clone(), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(StoredBlob { location, size })
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, BackupError> {
        self.lock()
            .get(location)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(location.to_string()))
    }

    async fn exists(&self, location: &str) -> Result<bool, BackupError> {
        Ok(self.lock().contains_key(location))
    }

    async fn delete(&self, location: &str) -> Result<(), BackupError> {
        self.lock()
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| BackupError::NotFound(location.to_string()))
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }
}

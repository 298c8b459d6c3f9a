//! S3 backup backend.
//!
//! Uploads carry an `x-amz-checksum-sha256` header when the caller supplies
//! the expected digest; S3 rejects the write if the bytes it received hash
//! differently.

use aws_config::BehaviorVersion;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_types::base64;

use ark_core::error::BackupError;
use ark_core::hashing::digest_bytes;
use ark_core::ports::{BackupStore, BlobSource, StoredBlob};
use async_trait::async_trait;

use crate::validate_key;

/// Error codes S3 returns when a supplied checksum does not match the body.
const CHECKSUM_ERROR_CODES: &[&str] = &["BadDigest", "InvalidDigest", "XAmzContentChecksumMismatch"];

pub struct S3BackupStore {
    client: Client,
    bucket: String,
    prefix: String,
    versioned: bool,
}

impl S3BackupStore {
    pub fn new(client: Client, bucket: String, prefix: String, versioned: bool) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
            versioned,
        }
    }

    /// Build a client from the standard AWS environment (credentials,
    /// region, endpoint overrides).
    pub async fn from_env(bucket: String, prefix: String, versioned: bool) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(Client::new(&config), bucket, prefix, versioned)
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn location(&self, object_key: &str) -> String {
        format!("s3://{}/{object_key}", self.bucket)
    }

    /// Extract the object key from an `s3://bucket/key` location in this
    /// store's bucket.
    fn key_of<'a>(&self, location: &'a str) -> Result<&'a str, BackupError> {
        location
            .strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .filter(|(bucket, key)| *bucket == self.bucket && !key.is_empty())
            .map(|(_, key)| key)
            .ok_or_else(|| BackupError::InvalidLocation(location.to_string()))
    }
}

#[async_trait]
impl BackupStore for S3BackupStore {
    async fn put(
        &self,
        key: &str,
        source: BlobSource,
        expected_sha256: Option<&str>,
    ) -> Result<StoredBlob, BackupError> {
        validate_key(key)?;
        let object_key = self.object_key(key);
        let location = self.location(&object_key);

        let (body, size) = match source {
            BlobSource::Bytes(bytes) => {
                let size = bytes.len() as i64;
                (ByteStream::from(bytes), size)
            }
            BlobSource::File(path) => {
                let size = tokio::fs::metadata(&path).await?.len() as i64;
                let body = ByteStream::from_path(&path)
                    .await
                    .map_err(|e| BackupError::Backend(format!("Failed to open {}: {e}", path.display())))?;
                (body, size)
            }
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body);
        if let Some(expected) = expected_sha256 {
            let raw = digest_bytes(expected)
                .map_err(|e| BackupError::Backend(format!("Invalid SHA-256 '{expected}': {e}")))?;
            request = request.checksum_sha256(base64::encode(raw));
        }

        if let Err(e) = request.send().await {
            let code = e.as_service_error().and_then(|se| se.code()).map(str::to_string);
            if let (Some(code), Some(expected)) = (code.as_deref(), expected_sha256) {
                if CHECKSUM_ERROR_CODES.contains(&code) {
                    tracing::warn!(%location, code, "S3 rejected upload checksum");
                    return Err(BackupError::ChecksumRejected {
                        location,
                        expected: expected.to_string(),
                        actual: format!("rejected by S3 ({code})"),
                    });
                }
            }
            tracing::error!(%location, error = ?e, "S3 PUT failed");
            return Err(BackupError::Backend(format!("Failed to write {location}: {e}")));
        }

        tracing::debug!(%location, size, "Stored blob");
        Ok(StoredBlob { location, size })
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, BackupError> {
        let key = self.key_of(location)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    BackupError::NotFound(location.to_string())
                } else {
                    BackupError::Backend(format!("Failed to read {location}: {service_error}"))
                }
            })?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| BackupError::Backend(format!("Failed to collect body: {e}")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn exists(&self, location: &str) -> Result<bool, BackupError> {
        let key = self.key_of(location)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(BackupError::Backend(format!(
                        "Failed to check {location}: {service_error}"
                    )))
                }
            }
        }
    }

    async fn delete(&self, location: &str) -> Result<(), BackupError> {
        let key = self.key_of(location)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BackupError::Backend(format!("Failed to delete {location}: {e}")))?;
        Ok(())
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }
}

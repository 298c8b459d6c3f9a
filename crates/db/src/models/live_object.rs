//! Models for the `live_objects` and `live_binaries` tables.

use std::path::PathBuf;

use ark_core::error::StoreError;
use ark_core::live::{LiveBinary, LiveObject};
use ark_core::types::{DbId, Timestamp};
use ark_core::version::LockToken;
use serde::Deserialize;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `live_objects` table.
#[derive(Debug, Clone, FromRow)]
pub struct LiveObjectRow {
    pub id: DbId,
    pub kind: String,
    pub parent_id: Option<DbId>,
    pub lock_token: String,
    pub metadata: serde_json::Value,
    pub committed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `live_binaries` table.
#[derive(Debug, Clone, FromRow)]
pub struct LiveBinaryRow {
    pub id: DbId,
    pub object_id: DbId,
    pub binary_use: String,
    pub local_path: String,
    pub checksum: Option<String>,
    pub size: i64,
}

/// DTO for inserting a live object.
#[derive(Debug, Deserialize)]
pub struct CreateLiveObject {
    pub kind: String,
    pub parent_id: Option<DbId>,
    pub lock_token: String,
    pub metadata: serde_json::Value,
}

/// DTO for attaching a binary to a live object.
#[derive(Debug, Deserialize)]
pub struct CreateLiveBinary {
    pub binary_use: String,
    pub local_path: String,
    pub checksum: Option<String>,
    pub size: i64,
}

impl LiveBinaryRow {
    pub fn into_domain(self) -> Result<LiveBinary, StoreError> {
        Ok(LiveBinary {
            id: self.id,
            binary_use: parse_column("binary_use", &self.binary_use)?,
            local_path: PathBuf::from(self.local_path),
            checksum: self.checksum,
            size: self.size,
        })
    }
}

impl LiveObjectRow {
    /// Combine with the object's binary rows.
    pub fn into_domain(self, binaries: Vec<LiveBinaryRow>) -> Result<LiveObject, StoreError> {
        Ok(LiveObject {
            id: self.id,
            kind: parse_column("kind", &self.kind)?,
            parent_id: self.parent_id,
            lock_token: LockToken::new(self.lock_token),
            metadata: self.metadata,
            binaries: binaries
                .into_iter()
                .map(LiveBinaryRow::into_domain)
                .collect::<Result<_, _>>()?,
        })
    }
}

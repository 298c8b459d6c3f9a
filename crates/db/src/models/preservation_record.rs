//! Models for the `preservation_records` and `binary_nodes` tables.

use ark_core::error::StoreError;
use ark_core::hashing::Checksums;
use ark_core::preservation::{BinaryNode, PreservationRecord, PreservedNode};
use ark_core::types::{DbId, Timestamp};
use ark_core::version::LockToken;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `preservation_records` table. The metadata node is
/// flattened into nullable columns.
#[derive(Debug, Clone, FromRow)]
pub struct PreservationRecordRow {
    pub id: DbId,
    pub preserved_object_id: DbId,
    pub metadata_location: Option<String>,
    pub metadata_sha1: Option<String>,
    pub metadata_sha256: Option<String>,
    pub metadata_sha512: Option<String>,
    pub metadata_size: Option<i64>,
    pub metadata_version: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `binary_nodes` table.
#[derive(Debug, Clone, FromRow)]
pub struct BinaryNodeRow {
    pub id: DbId,
    pub record_id: DbId,
    pub binary_use: String,
    pub source_binary_id: DbId,
    pub source_checksum: String,
    pub location: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
    pub size: i64,
}

impl BinaryNodeRow {
    pub fn into_domain(self) -> Result<BinaryNode, StoreError> {
        Ok(BinaryNode {
            id: self.id,
            binary_use: parse_column("binary_use", &self.binary_use)?,
            source_binary_id: self.source_binary_id,
            source_checksum: self.source_checksum,
            node: PreservedNode {
                location: self.location,
                checksums: Checksums {
                    sha1: self.sha1,
                    sha256: self.sha256,
                    sha512: self.sha512,
                },
                size: self.size,
            },
        })
    }
}

impl PreservationRecordRow {
    fn metadata_node(&self) -> Option<PreservedNode> {
        match (
            &self.metadata_location,
            &self.metadata_sha1,
            &self.metadata_sha256,
            &self.metadata_sha512,
            self.metadata_size,
        ) {
            (Some(location), Some(sha1), Some(sha256), Some(sha512), Some(size)) => {
                Some(PreservedNode {
                    location: location.clone(),
                    checksums: Checksums {
                        sha1: sha1.clone(),
                        sha256: sha256.clone(),
                        sha512: sha512.clone(),
                    },
                    size,
                })
            }
            _ => None,
        }
    }

    /// Combine with the record's binary node rows, ordered by use.
    pub fn into_domain(self, nodes: Vec<BinaryNodeRow>) -> Result<PreservationRecord, StoreError> {
        let metadata_node = self.metadata_node();
        let mut binary_nodes = nodes
            .into_iter()
            .map(BinaryNodeRow::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        binary_nodes.sort_by_key(|n| n.binary_use);
        Ok(PreservationRecord {
            id: self.id,
            preserved_object_id: self.preserved_object_id,
            metadata_node,
            metadata_version: self.metadata_version.map(LockToken::new),
            binary_nodes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

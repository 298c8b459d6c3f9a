//! Models for the `fixity_events` table and its `fixity_latest` index.

use ark_core::error::StoreError;
use ark_core::fixity::{FixityEvent, NodeRef};
use ark_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_column;

/// A row from the `fixity_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct FixityEventRow {
    pub id: DbId,
    pub status: String,
    pub resource_id: DbId,
    pub child_id: Option<DbId>,
    pub child_property: String,
    pub origin: String,
    pub detail: Option<String>,
    pub created_at: Timestamp,
}

impl FixityEventRow {
    pub fn into_domain(self) -> Result<FixityEvent, StoreError> {
        Ok(FixityEvent {
            id: self.id,
            status: parse_column("status", &self.status)?,
            node: NodeRef {
                resource_id: self.resource_id,
                child_id: self.child_id,
                child_property: parse_column("child_property", &self.child_property)?,
            },
            origin: parse_column("origin", &self.origin)?,
            detail: self.detail,
            created_at: self.created_at,
        })
    }
}

/// Key used by `fixity_latest`: the metadata node has no child id.
pub fn child_key(node: &NodeRef) -> DbId {
    node.child_id.unwrap_or(0)
}

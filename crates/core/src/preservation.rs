//! The preservation record: one per preserved live object.

use serde::{Deserialize, Serialize};

use crate::hashing::Checksums;
use crate::object::BinaryUse;
use crate::types::{DbId, Timestamp};
use crate::version::LockToken;

/// Descriptor of one preserved copy in the backup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservedNode {
    /// Location URI understood by the backup store (`s3://…`, `file://…`).
    pub location: String,
    pub checksums: Checksums,
    pub size: i64,
}

/// A preserved binary, one per [`BinaryUse`] present on the live object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryNode {
    pub id: DbId,
    pub binary_use: BinaryUse,
    /// The live binary this node preserves.
    pub source_binary_id: DbId,
    /// The live binary's recorded SHA-256 at preservation time.
    pub source_checksum: String,
    pub node: PreservedNode,
}

/// Input for [`PreservationStore::upsert_binary_node`](crate::ports::PreservationStore::upsert_binary_node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinaryNode {
    pub binary_use: BinaryUse,
    pub source_binary_id: DbId,
    pub source_checksum: String,
    pub node: PreservedNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationRecord {
    pub id: DbId,
    pub preserved_object_id: DbId,
    pub metadata_node: Option<PreservedNode>,
    pub metadata_version: Option<LockToken>,
    /// Ordered by binary use.
    pub binary_nodes: Vec<BinaryNode>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PreservationRecord {
    pub fn binary_node(&self, binary_use: BinaryUse) -> Option<&BinaryNode> {
        self.binary_nodes.iter().find(|n| n.binary_use == binary_use)
    }

    pub fn binary_node_by_id(&self, node_id: DbId) -> Option<&BinaryNode> {
        self.binary_nodes.iter().find(|n| n.id == node_id)
    }

    /// Every blob location this record references.
    pub fn locations(&self) -> Vec<&str> {
        self.metadata_node
            .iter()
            .map(|n| n.location.as_str())
            .chain(self.binary_nodes.iter().map(|b| b.node.location.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(location: &str) -> PreservedNode {
        PreservedNode {
            location: location.into(),
            checksums: Checksums::compute(location.as_bytes()),
            size: location.len() as i64,
        }
    }

    #[test]
    fn locations_cover_metadata_and_binaries() {
        let record = PreservationRecord {
            id: 1,
            preserved_object_id: 9,
            metadata_node: Some(node("mem://m")),
            metadata_version: Some(LockToken::from("v1")),
            binary_nodes: vec![BinaryNode {
                id: 5,
                binary_use: BinaryUse::Original,
                source_binary_id: 50,
                source_checksum: "x".into(),
                node: node("mem://b"),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(record.locations(), vec!["mem://m", "mem://b"]);
        assert_eq!(record.binary_node_by_id(5).unwrap().source_binary_id, 50);
        assert!(record.binary_node(BinaryUse::Caption).is_none());
    }
}

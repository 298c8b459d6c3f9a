//! The live objects the preservation core is asked to protect.
//!
//! These are read-only views handed over by the editing pipeline through
//! [`LiveRepository`](crate::ports::LiveRepository).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::{BinaryUse, ObjectKind};
use crate::types::DbId;
use crate::version::LockToken;

/// A binary file attached to a live object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBinary {
    pub id: DbId,
    pub binary_use: BinaryUse,
    pub local_path: PathBuf,
    /// SHA-256 recorded once the file has been characterized. `None` means
    /// the pipeline has not finished with it and preservation must wait.
    pub checksum: Option<String>,
    pub size: i64,
}

/// A live metadata record with its binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveObject {
    pub id: DbId,
    pub kind: ObjectKind,
    pub parent_id: Option<DbId>,
    pub lock_token: LockToken,
    pub metadata: Value,
    pub binaries: Vec<LiveBinary>,
}

impl LiveObject {
    pub fn binary(&self, binary_use: BinaryUse) -> Option<&LiveBinary> {
        self.binaries.iter().find(|b| b.binary_use == binary_use)
    }

    /// Canonical byte form of the metadata snapshot.
    ///
    /// Object keys are sorted recursively so that the same content always
    /// hashes to the same checksum regardless of insertion order.
    pub fn canonical_metadata(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut binaries: Vec<Value> = self
            .binaries
            .iter()
            .map(|b| {
                serde_json::json!({
                    "use": b.binary_use,
                    "sha256": b.checksum,
                    "size": b.size,
                })
            })
            .collect();
        binaries.sort_by(|a, b| a["use"].as_str().cmp(&b["use"].as_str()));

        let snapshot = serde_json::json!({
            "id": self.id,
            "model": self.kind,
            "parent_id": self.parent_id,
            "metadata": self.metadata,
            "binaries": binaries,
        });
        serde_json::to_vec(&canonicalize(&snapshot))
    }
}

/// Rebuild a JSON value with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

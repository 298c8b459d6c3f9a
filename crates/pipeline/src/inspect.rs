//! Structural check of one object's preserved state, shared by the audit
//! jobs and the status reporter.
//!
//! Unlike the asynchronous fixity path this runs inline: it compares what
//! the live object says should be preserved with what the record and the
//! backup store actually hold, and returns every discrepancy as a
//! human-readable reason. Errors while checking are reported as reasons too,
//! so one bad object never aborts a sweep.

use std::sync::Arc;

use ark_core::hashing::sha256_hex;
use ark_core::live::LiveObject;
use ark_core::ports::{BackupStore, LiveRepository, PreservationStore};
use ark_core::preservation::{PreservationRecord, PreservedNode};
use ark_core::types::DbId;
use ark_core::version::is_stale;

use crate::error::PreservationError;

pub struct ObjectInspector {
    live: Arc<dyn LiveRepository>,
    records: Arc<dyn PreservationStore>,
    backup: Arc<dyn BackupStore>,
}

impl ObjectInspector {
    pub fn new(
        live: Arc<dyn LiveRepository>,
        records: Arc<dyn PreservationStore>,
        backup: Arc<dyn BackupStore>,
    ) -> Self {
        Self {
            live,
            records,
            backup,
        }
    }

    /// Reasons the object's preserved state is wrong. Empty means healthy.
    ///
    /// With `skip_metadata_checksum` the metadata copy is only checked for
    /// presence, not re-read and hashed.
    pub async fn inspect(&self, object_id: DbId, skip_metadata_checksum: bool) -> Vec<String> {
        match self.check(object_id, skip_metadata_checksum).await {
            Ok(reasons) => reasons,
            Err(e) => vec![format!("check error: {e}")],
        }
    }

    async fn check(
        &self,
        object_id: DbId,
        skip_metadata_checksum: bool,
    ) -> Result<Vec<String>, PreservationError> {
        let Some(object) = self.live.find(object_id).await? else {
            return Ok(vec!["live object not found".to_string()]);
        };
        let Some(record) = self.records.find_by_object(object_id).await? else {
            return Ok(vec!["no preservation record".to_string()]);
        };

        let mut reasons = Vec::new();
        self.check_metadata(&object, &record, skip_metadata_checksum, &mut reasons)
            .await?;
        self.check_binaries(&object, &record, &mut reasons).await?;
        Ok(reasons)
    }

    async fn check_metadata(
        &self,
        object: &LiveObject,
        record: &PreservationRecord,
        skip_checksum: bool,
        reasons: &mut Vec<String>,
    ) -> Result<(), PreservationError> {
        let Some(node) = &record.metadata_node else {
            reasons.push("metadata not preserved".to_string());
            return Ok(());
        };
        if is_stale(record.metadata_version.as_ref(), &object.lock_token) {
            reasons.push(format!(
                "metadata version stale: preserved {}, live {}",
                record
                    .metadata_version
                    .as_ref()
                    .map_or("none", |v| v.as_str()),
                object.lock_token
            ));
        }
        if skip_checksum {
            if !self.backup.exists(&node.location).await? {
                reasons.push(format!("metadata copy missing at {}", node.location));
            }
        } else {
            let expected = sha256_hex(&object.canonical_metadata()?);
            if !node.checksums.matches_sha256(&expected) {
                reasons.push(format!(
                    "metadata checksum mismatch: preserved {}, live {expected}",
                    node.checksums.sha256
                ));
            }
            if let Some(reason) = self.verify_copy(node).await? {
                reasons.push(format!("metadata {reason}"));
            }
        }
        Ok(())
    }

    async fn check_binaries(
        &self,
        object: &LiveObject,
        record: &PreservationRecord,
        reasons: &mut Vec<String>,
    ) -> Result<(), PreservationError> {
        for binary in &object.binaries {
            // Not yet characterized: nothing is expected to be preserved.
            let Some(expected) = binary.checksum.as_deref() else {
                continue;
            };
            let Some(preserved) = record.binary_node(binary.binary_use) else {
                reasons.push(format!("{} not preserved", binary.binary_use));
                continue;
            };
            if !preserved.source_checksum.eq_ignore_ascii_case(expected) {
                reasons.push(format!(
                    "{} checksum mismatch: preserved {}, live {expected}",
                    binary.binary_use, preserved.source_checksum
                ));
            }
            if !self.backup.exists(&preserved.node.location).await? {
                reasons.push(format!(
                    "{} copy missing at {}",
                    binary.binary_use, preserved.node.location
                ));
            }
        }
        Ok(())
    }

    /// Re-read a small preserved copy and compare its digest.
    async fn verify_copy(&self, node: &PreservedNode) -> Result<Option<String>, PreservationError> {
        match self.backup.get(&node.location).await {
            Ok(bytes) => {
                let actual = sha256_hex(&bytes);
                if node.checksums.matches_sha256(&actual) {
                    Ok(None)
                } else {
                    Ok(Some(format!(
                        "copy corrupted at {}: expected {}, got {actual}",
                        node.location, node.checksums.sha256
                    )))
                }
            }
            Err(e) if e.is_not_found() => Ok(Some(format!("copy missing at {}", node.location))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFixityEventStore, MemoryLiveRepository, MemoryPreservationStore};
    use crate::preserver::Preserver;
    use ark_cloud::memory::MemoryBackupStore;
    use ark_core::object::ObjectKind;
    use ark_core::version::LockToken;
    use ark_events::EventBus;
    use serde_json::json;

    struct Setup {
        live: Arc<MemoryLiveRepository>,
        backup: Arc<MemoryBackupStore>,
        records: Arc<MemoryPreservationStore>,
        preserver: Preserver,
        inspector: ObjectInspector,
    }

    fn setup() -> Setup {
        let live = Arc::new(MemoryLiveRepository::new());
        let records = Arc::new(MemoryPreservationStore::new());
        let backup = Arc::new(MemoryBackupStore::new(false));
        let preserver = Preserver::new(
            live.clone(),
            records.clone(),
            Arc::new(MemoryFixityEventStore::new()),
            backup.clone(),
            Arc::new(EventBus::default()),
            false,
        );
        let inspector = ObjectInspector::new(live.clone(), records.clone(), backup.clone());
        Setup {
            live,
            backup,
            records,
            preserver,
            inspector,
        }
    }

    fn object(id: DbId) -> LiveObject {
        LiveObject {
            id,
            kind: ObjectKind::Component,
            parent_id: None,
            lock_token: LockToken::from("v1"),
            metadata: json!({"title": "t"}),
            binaries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn healthy_object_has_no_reasons() {
        let s = setup();
        s.live.put(object(1));
        s.preserver.preserve_object_id(1).await.unwrap();
        assert!(s.inspector.inspect(1, false).await.is_empty());
    }

    #[tokio::test]
    async fn unpreserved_object_is_reported() {
        let s = setup();
        s.live.put(object(2));
        assert_eq!(s.inspector.inspect(2, false).await, vec!["no preservation record"]);
    }

    #[tokio::test]
    async fn stale_and_corrupted_metadata_are_reported() {
        let s = setup();
        s.live.put(object(3));
        let record = s.preserver.preserve_object_id(3).await.unwrap();
        let location = record.metadata_node.unwrap().location;
        s.backup.corrupt(&location, b"garbage");
        s.live.update(3, |o| o.lock_token = LockToken::from("v2"));

        let reasons = s.inspector.inspect(3, false).await;
        assert!(reasons.iter().any(|r| r.starts_with("metadata version stale")));
        assert!(reasons.iter().any(|r| r.starts_with("metadata copy corrupted")));
    }

    #[tokio::test]
    async fn skip_checksum_only_checks_presence() {
        let s = setup();
        s.live.put(object(4));
        let record = s.preserver.preserve_object_id(4).await.unwrap();
        let location = record.metadata_node.unwrap().location;
        s.backup.corrupt(&location, b"garbage");
        assert!(s.inspector.inspect(4, true).await.is_empty());

        s.backup.remove(&location);
        let reasons = s.inspector.inspect(4, true).await;
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("metadata copy missing"));
        assert_eq!(s.records.count().await.unwrap(), 1);
    }
}

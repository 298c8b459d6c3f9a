//! The Preserver: keeps each live object's Preservation Record in step with
//! the object.
//!
//! Uploads happen before the record is updated, so a record never points at
//! a blob that failed to write. Unchanged metadata (same lock token) and
//! unchanged binaries (same source checksum) are skipped.

use std::collections::HashSet;
use std::sync::Arc;

use ark_core::error::StoreError;
use ark_core::hashing::Checksums;
use ark_core::live::{LiveBinary, LiveObject};
use ark_core::object::{BinaryUse, CascadePolicy};
use ark_core::paths::{binary_key, metadata_key};
use ark_core::ports::{BackupStore, BlobSource, FixityEventStore, LiveRepository, PreservationStore};
use ark_core::preservation::{NewBinaryNode, PreservationRecord, PreservedNode};
use ark_core::types::DbId;
use ark_core::version::is_stale;
use ark_events::{EventBus, PreservationEvent};
use chrono::Utc;

use crate::error::PreservationError;

/// Which parts of an object a preservation pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveScope {
    Everything,
    MetadataOnly,
    /// A single binary, leaving its siblings untouched.
    BinaryOnly(BinaryUse),
}

impl PreserveScope {
    fn covers_metadata(self) -> bool {
        matches!(self, Self::Everything | Self::MetadataOnly)
    }

    fn covers_binary(self, binary_use: BinaryUse) -> bool {
        match self {
            Self::Everything => true,
            Self::MetadataOnly => false,
            Self::BinaryOnly(only) => only == binary_use,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PreserveOptions {
    pub scope: PreserveScope,
    /// Upload even when the preserved copy looks current. Applies to the
    /// object itself, never to cascaded children.
    pub force: bool,
    pub cascade: bool,
}

impl Default for PreserveOptions {
    fn default() -> Self {
        Self {
            scope: PreserveScope::Everything,
            force: false,
            cascade: true,
        }
    }
}

pub struct Preserver {
    live: Arc<dyn LiveRepository>,
    records: Arc<dyn PreservationStore>,
    events: Arc<dyn FixityEventStore>,
    backup: Arc<dyn BackupStore>,
    bus: Arc<EventBus>,
    cascade: bool,
}

impl Preserver {
    pub fn new(
        live: Arc<dyn LiveRepository>,
        records: Arc<dyn PreservationStore>,
        events: Arc<dyn FixityEventStore>,
        backup: Arc<dyn BackupStore>,
        bus: Arc<EventBus>,
        cascade: bool,
    ) -> Self {
        Self {
            live,
            records,
            events,
            backup,
            bus,
            cascade,
        }
    }

    /// Preserve an object with the configured cascade policy.
    pub async fn preserve(&self, object: &LiveObject) -> Result<PreservationRecord, PreservationError> {
        let options = PreserveOptions {
            cascade: self.cascade,
            ..PreserveOptions::default()
        };
        self.preserve_with(object, options).await
    }

    /// Load an object from the live store and preserve it.
    pub async fn preserve_object_id(
        &self,
        object_id: DbId,
    ) -> Result<PreservationRecord, PreservationError> {
        let object = self
            .live
            .find(object_id)
            .await?
            .ok_or(PreservationError::LiveObjectNotFound(object_id))?;
        self.preserve(&object).await
    }

    pub async fn preserve_with(
        &self,
        object: &LiveObject,
        options: PreserveOptions,
    ) -> Result<PreservationRecord, PreservationError> {
        let record = self.preserve_one(object, options.scope, options.force).await?;

        if options.cascade && object.kind.cascade_policy() == CascadePolicy::CascadingContainer {
            self.cascade_children(object).await?;
        }
        Ok(record)
    }

    /// Preserve committed descendants of a cascading container, depth first.
    async fn cascade_children(&self, root: &LiveObject) -> Result<(), PreservationError> {
        let mut visited: HashSet<DbId> = HashSet::from([root.id]);
        let mut stack = vec![root.id];

        while let Some(parent_id) = stack.pop() {
            for child in self.live.committed_children(parent_id).await? {
                if !visited.insert(child.id) {
                    continue;
                }
                self.preserve_one(&child, PreserveScope::Everything, false)
                    .await?;
                if child.kind.cascade_policy() == CascadePolicy::CascadingContainer {
                    stack.push(child.id);
                }
            }
        }
        Ok(())
    }

    async fn preserve_one(
        &self,
        object: &LiveObject,
        scope: PreserveScope,
        force: bool,
    ) -> Result<PreservationRecord, PreservationError> {
        let mut record = self.resolve_record(object.id).await?;
        let mut changed = false;

        if scope.covers_metadata()
            && (force
                || record.metadata_node.is_none()
                || is_stale(record.metadata_version.as_ref(), &object.lock_token))
        {
            record = self.preserve_metadata(&record, object).await?;
            changed = true;
        }

        for binary in &object.binaries {
            if !scope.covers_binary(binary.binary_use) {
                continue;
            }
            let Some(expected) = binary.checksum.as_deref() else {
                tracing::debug!(
                    object_id = object.id,
                    binary_use = %binary.binary_use,
                    "Binary not yet characterized, skipping"
                );
                continue;
            };
            if !force && binary_is_current(&record, binary, expected) {
                continue;
            }
            self.preserve_binary(&record, object.id, binary, expected)
                .await?;
            changed = true;
        }

        if changed {
            record = self
                .records
                .find(record.id)
                .await?
                .ok_or(PreservationError::RecordNotFound(record.id))?;
            tracing::info!(
                record_id = record.id,
                object_id = object.id,
                "Preservation record updated"
            );
            self.bus.publish(PreservationEvent::RecordPreserved {
                record_id: record.id,
                object_id: object.id,
                at: Utc::now(),
            });
        }
        Ok(record)
    }

    /// Find the object's record or create it. A concurrent creator winning
    /// the uniqueness race is not an error: re-read and use theirs.
    async fn resolve_record(&self, object_id: DbId) -> Result<PreservationRecord, PreservationError> {
        if let Some(record) = self.records.find_by_object(object_id).await? {
            return Ok(record);
        }
        match self.records.create(object_id).await {
            Ok(record) => Ok(record),
            Err(err) if err.is_duplicate() => {
                tracing::debug!(object_id, "Lost record creation race, re-reading");
                self.records
                    .find_by_object(object_id)
                    .await?
                    .ok_or(PreservationError::Store(StoreError::NotFound {
                        entity: "PreservationRecord",
                        id: object_id,
                    }))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn preserve_metadata(
        &self,
        record: &PreservationRecord,
        object: &LiveObject,
    ) -> Result<PreservationRecord, PreservationError> {
        let bytes = object.canonical_metadata()?;
        let checksums = Checksums::compute(&bytes);
        let stored = self
            .backup
            .put(
                &metadata_key(object.id),
                BlobSource::Bytes(bytes),
                Some(&checksums.sha256),
            )
            .await?;

        let node = PreservedNode {
            location: stored.location,
            checksums,
            size: stored.size,
        };
        let updated = self
            .records
            .set_metadata_node(record.id, &node, &object.lock_token)
            .await?;
        tracing::debug!(
            record_id = record.id,
            version = %object.lock_token,
            "Metadata preserved"
        );
        Ok(updated)
    }

    async fn preserve_binary(
        &self,
        record: &PreservationRecord,
        object_id: DbId,
        binary: &LiveBinary,
        expected: &str,
    ) -> Result<(), PreservationError> {
        let (checksums, _) = Checksums::compute_file(&binary.local_path)
            .await
            .map_err(|e| PreservationError::io(&binary.local_path, e))?;
        if !checksums.matches_sha256(expected) {
            return Err(PreservationError::LocalChecksumMismatch {
                binary_id: binary.id,
                path: binary.local_path.display().to_string(),
                expected: expected.to_string(),
                actual: checksums.sha256,
            });
        }

        let stored = self
            .backup
            .put(
                &binary_key(object_id, binary.binary_use),
                BlobSource::File(binary.local_path.clone()),
                Some(expected),
            )
            .await?;

        let node = NewBinaryNode {
            binary_use: binary.binary_use,
            source_binary_id: binary.id,
            source_checksum: expected.to_ascii_lowercase(),
            node: PreservedNode {
                location: stored.location,
                checksums,
                size: stored.size,
            },
        };
        self.records.upsert_binary_node(record.id, &node).await?;
        tracing::debug!(
            record_id = record.id,
            binary_use = %binary.binary_use,
            "Binary preserved"
        );
        Ok(())
    }

    /// Remove an object's record, its fixity history and, unless the backup
    /// store is versioned, its preserved blobs. Returns `false` when the
    /// object was never preserved.
    pub async fn on_delete(&self, object_id: DbId) -> Result<bool, PreservationError> {
        let Some(record) = self.records.find_by_object(object_id).await? else {
            return Ok(false);
        };

        if self.backup.is_versioned() {
            tracing::debug!(record_id = record.id, "Versioned backup store, keeping blobs");
        } else {
            for location in record.locations() {
                match self.backup.delete(location).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(location, "Preserved copy already gone");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let events = self.events.delete_for_resource(record.id).await?;
        self.records.delete(record.id).await?;
        tracing::info!(
            record_id = record.id,
            object_id,
            events_removed = events,
            "Preservation record deleted"
        );
        self.bus.publish(PreservationEvent::RecordDeleted {
            record_id: record.id,
            object_id,
            at: Utc::now(),
        });
        Ok(true)
    }
}

fn binary_is_current(record: &PreservationRecord, binary: &LiveBinary, expected: &str) -> bool {
    record.binary_node(binary.binary_use).is_some_and(|node| {
        node.source_binary_id == binary.id && node.source_checksum.eq_ignore_ascii_case(expected)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFixityEventStore, MemoryLiveRepository, MemoryPreservationStore};
    use ark_cloud::memory::MemoryBackupStore;
    use ark_core::hashing::sha256_hex;
    use ark_core::object::ObjectKind;
    use ark_core::ports::StoreResult;
    use ark_core::version::LockToken;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        live: Arc<MemoryLiveRepository>,
        records: Arc<MemoryPreservationStore>,
        backup: Arc<MemoryBackupStore>,
        preserver: Preserver,
        _dir: tempfile::TempDir,
        dir_path: std::path::PathBuf,
    }

    fn harness_with(records: Arc<dyn PreservationStore>, inner: Arc<MemoryPreservationStore>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let live = Arc::new(MemoryLiveRepository::new());
        let backup = Arc::new(MemoryBackupStore::new(false));
        let preserver = Preserver::new(
            live.clone(),
            records,
            Arc::new(MemoryFixityEventStore::new()),
            backup.clone(),
            Arc::new(EventBus::default()),
            true,
        );
        Harness {
            live,
            records: inner,
            backup,
            preserver,
            dir_path: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        let records = Arc::new(MemoryPreservationStore::new());
        harness_with(records.clone(), records)
    }

    fn object(id: DbId, kind: ObjectKind, parent_id: Option<DbId>) -> LiveObject {
        LiveObject {
            id,
            kind,
            parent_id,
            lock_token: LockToken::from("v1"),
            metadata: json!({"title": format!("object {id}")}),
            binaries: Vec::new(),
        }
    }

    fn with_file(h: &Harness, mut obj: LiveObject, binary_use: BinaryUse, content: &[u8]) -> LiveObject {
        let path = h.dir_path.join(format!("{}-{}", obj.id, binary_use));
        std::fs::write(&path, content).unwrap();
        obj.binaries.push(LiveBinary {
            id: obj.id * 100 + obj.binaries.len() as DbId,
            binary_use,
            local_path: path,
            checksum: Some(sha256_hex(content)),
            size: content.len() as i64,
        });
        obj
    }

    #[tokio::test]
    async fn uncharacterized_binary_is_skipped() {
        let h = harness();
        let mut obj = with_file(&h, object(1, ObjectKind::Component, None), BinaryUse::Original, b"x");
        obj.binaries[0].checksum = None;

        let record = h.preserver.preserve(&obj).await.unwrap();
        assert!(record.metadata_node.is_some());
        assert!(record.binary_nodes.is_empty());
        assert_eq!(h.backup.put_count(), 1);
    }

    #[tokio::test]
    async fn local_mismatch_refuses_upload() {
        let h = harness();
        let mut obj = with_file(&h, object(2, ObjectKind::Component, None), BinaryUse::Original, b"good");
        obj.binaries[0].checksum = Some(sha256_hex(b"other"));

        let err = h.preserver.preserve(&obj).await.unwrap_err();
        assert_matches!(err, PreservationError::LocalChecksumMismatch { binary_id: 200, .. });
        let record = h.records.find_by_object(2).await.unwrap().unwrap();
        assert!(record.binary_nodes.is_empty());
    }

    #[tokio::test]
    async fn upload_failure_leaves_record_untouched() {
        let h = harness();
        let obj = object(3, ObjectKind::Component, None);
        h.backup.set_fail_puts(true);

        assert_matches!(
            h.preserver.preserve(&obj).await,
            Err(PreservationError::Backup(_))
        );
        let record = h.records.find_by_object(3).await.unwrap().unwrap();
        assert!(record.metadata_node.is_none());
        assert!(record.metadata_version.is_none());
    }

    #[tokio::test]
    async fn binary_only_scope_leaves_siblings() {
        let h = harness();
        let obj = with_file(&h, object(4, ObjectKind::Component, None), BinaryUse::PreservationMaster, b"pm");
        let obj = with_file(&h, obj, BinaryUse::Intermediate, b"im");
        h.preserver.preserve(&obj).await.unwrap();
        let before = h.backup.put_count();

        let options = PreserveOptions {
            scope: PreserveScope::BinaryOnly(BinaryUse::Intermediate),
            force: true,
            cascade: false,
        };
        h.preserver.preserve_with(&obj, options).await.unwrap();
        assert_eq!(h.backup.put_count(), before + 1);
    }

    #[tokio::test]
    async fn cascading_container_preserves_children() {
        let h = harness();
        let item = object(10, ObjectKind::Item, None);
        h.live.put(item.clone());
        h.live.put(object(11, ObjectKind::Component, Some(10)));
        h.live.put(object(12, ObjectKind::Component, Some(10)));

        h.preserver.preserve(&item).await.unwrap();
        assert_eq!(h.records.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn non_cascading_container_preserves_only_itself() {
        let h = harness();
        let folder = object(20, ObjectKind::Folder, None);
        h.live.put(folder.clone());
        h.live.put(object(21, ObjectKind::Item, Some(20)));

        h.preserver.preserve(&folder).await.unwrap();
        assert_eq!(h.records.count().await.unwrap(), 1);
    }

    /// Simulates a concurrent creator winning between our lookup and insert.
    struct RacingStore {
        inner: Arc<MemoryPreservationStore>,
    }

    #[async_trait]
    impl PreservationStore for RacingStore {
        async fn find(&self, id: DbId) -> StoreResult<Option<PreservationRecord>> {
            self.inner.find(id).await
        }
        async fn find_by_object(&self, object_id: DbId) -> StoreResult<Option<PreservationRecord>> {
            self.inner.find_by_object(object_id).await
        }
        async fn create(&self, object_id: DbId) -> StoreResult<PreservationRecord> {
            self.inner.create(object_id).await?;
            Err(StoreError::Duplicate("uq_preservation_records_object".into()))
        }
        async fn set_metadata_node(
            &self,
            id: DbId,
            node: &PreservedNode,
            version: &LockToken,
        ) -> StoreResult<PreservationRecord> {
            self.inner.set_metadata_node(id, node, version).await
        }
        async fn upsert_binary_node(
            &self,
            id: DbId,
            node: &NewBinaryNode,
        ) -> StoreResult<ark_core::preservation::BinaryNode> {
            self.inner.upsert_binary_node(id, node).await
        }
        async fn delete(&self, id: DbId) -> StoreResult<()> {
            self.inner.delete(id).await
        }
        async fn count(&self) -> StoreResult<u64> {
            self.inner.count().await
        }
        async fn sample(&self, n: u64) -> StoreResult<Vec<PreservationRecord>> {
            self.inner.sample(n).await
        }
        async fn list_ids(&self) -> StoreResult<Vec<DbId>> {
            self.inner.list_ids().await
        }
    }

    #[tokio::test]
    async fn losing_creation_race_uses_winners_record() {
        let inner = Arc::new(MemoryPreservationStore::new());
        let h = harness_with(Arc::new(RacingStore { inner: inner.clone() }), inner);

        let record = h.preserver.preserve(&object(30, ObjectKind::Component, None)).await.unwrap();
        assert_eq!(h.records.count().await.unwrap(), 1);
        assert_eq!(record.preserved_object_id, 30);
        assert!(record.metadata_node.is_some());
    }

    #[tokio::test]
    async fn delete_of_unpreserved_object_is_noop() {
        let h = harness();
        assert!(!h.preserver.on_delete(99).await.unwrap());
    }
}

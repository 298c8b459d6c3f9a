//! Status Reporter: a resumable, file-backed full-corpus scan.
//!
//! State lives in one directory:
//!
//! | File                               | Contents                                  |
//! |------------------------------------|-------------------------------------------|
//! | `progress.json`                    | objects completed, last id, failing ids   |
//! | `failures.txt`                     | `<id>\t<reason>` per failure found        |
//! | `failures-recheck-<timestamp>.txt` | ids still failing after a recheck         |
//!
//! Progress is checkpointed after every chunk, so an interrupted scan
//! resumes after the last checkpointed id. A recheck reads the newest
//! failure list and writes a fresh, timestamped one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ark_core::ports::LiveRepository;
use ark_core::types::DbId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::PreservationError;
use crate::inspect::ObjectInspector;

pub const PROGRESS_FILE: &str = "progress.json";
pub const FAILURES_FILE: &str = "failures.txt";
const RECHECK_PREFIX: &str = "failures-recheck-";

/// Checkpointed scan state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProgress {
    pub completed: u64,
    /// Highest object id checked so far. Ids are scanned in ascending order.
    pub last_id: Option<DbId>,
    pub failing: Vec<DbId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Objects checked by this invocation.
    pub checked: u64,
    /// Failing ids in the output file.
    pub failing: Vec<DbId>,
    pub output: PathBuf,
}

pub struct StatusReporter {
    inspector: Arc<ObjectInspector>,
    live: Arc<dyn LiveRepository>,
    dir: PathBuf,
    batch_size: usize,
    skip_metadata_checksum: bool,
}

impl StatusReporter {
    pub fn new(
        inspector: Arc<ObjectInspector>,
        live: Arc<dyn LiveRepository>,
        dir: PathBuf,
        batch_size: usize,
    ) -> Self {
        Self {
            inspector,
            live,
            dir,
            batch_size: batch_size.max(1),
            skip_metadata_checksum: false,
        }
    }

    pub fn skip_metadata_checksum(mut self, skip: bool) -> Self {
        self.skip_metadata_checksum = skip;
        self
    }

    /// Scan every preservable object not yet covered by the checkpoint.
    pub async fn run(&self) -> Result<ReportSummary, PreservationError> {
        self.ensure_dir().await?;
        let mut progress = self.load_progress().await?;
        let failures_path = self.dir.join(FAILURES_FILE);

        let ids = self.live.preservable_ids().await?;
        let remaining: Vec<DbId> = match progress.last_id {
            Some(last) => ids.into_iter().filter(|&id| id > last).collect(),
            None => ids,
        };
        let fresh = progress.last_id.is_none();
        tracing::info!(
            dir = %self.dir.display(),
            already_completed = progress.completed,
            remaining = remaining.len(),
            "Status report scan starting"
        );

        let mut failures = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(!fresh)
            .truncate(fresh)
            .open(&failures_path)
            .await
            .map_err(|e| PreservationError::io(&failures_path, e))?;

        let mut checked = 0u64;
        for chunk in remaining.chunks(self.batch_size) {
            let mut lines = String::new();
            for &id in chunk {
                let reasons = self.inspector.inspect(id, self.skip_metadata_checksum).await;
                if !reasons.is_empty() {
                    progress.failing.push(id);
                    for reason in &reasons {
                        lines.push_str(&format!("{id}\t{reason}\n"));
                    }
                }
                progress.completed += 1;
                progress.last_id = Some(id);
                checked += 1;
            }
            failures
                .write_all(lines.as_bytes())
                .await
                .map_err(|e| PreservationError::io(&failures_path, e))?;
            failures
                .flush()
                .await
                .map_err(|e| PreservationError::io(&failures_path, e))?;
            self.save_progress(&progress).await?;
            tracing::info!(
                completed = progress.completed,
                failing = progress.failing.len(),
                "Status report checkpoint"
            );
        }

        tracing::info!(checked, failing = progress.failing.len(), "Status report scan finished");
        Ok(ReportSummary {
            checked,
            failing: progress.failing,
            output: failures_path,
        })
    }

    /// Re-examine the ids in the newest failure list and write those still
    /// failing to a new timestamped file.
    pub async fn recheck(&self) -> Result<ReportSummary, PreservationError> {
        let source = self.latest_failure_list().await?;
        let contents = tokio::fs::read_to_string(&source)
            .await
            .map_err(|e| PreservationError::io(&source, e))?;
        let ids = parse_ids(&contents);
        tracing::info!(source = %source.display(), ids = ids.len(), "Status report recheck starting");

        let mut lines = String::new();
        let mut failing = Vec::new();
        for &id in &ids {
            let reasons = self.inspector.inspect(id, self.skip_metadata_checksum).await;
            if reasons.is_empty() {
                continue;
            }
            failing.push(id);
            for reason in &reasons {
                lines.push_str(&format!("{id}\t{reason}\n"));
            }
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let output = self.dir.join(format!("{RECHECK_PREFIX}{stamp}.txt"));
        write_atomic(&output, lines.as_bytes()).await?;
        tracing::info!(
            checked = ids.len(),
            still_failing = failing.len(),
            output = %output.display(),
            "Status report recheck finished"
        );
        Ok(ReportSummary {
            checked: ids.len() as u64,
            failing,
            output,
        })
    }

    /// Forget the checkpoint so the next run starts from the first id.
    pub async fn reset(&self) -> Result<(), PreservationError> {
        for name in [PROGRESS_FILE, FAILURES_FILE] {
            let path = self.dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PreservationError::io(&path, e)),
            }
        }
        Ok(())
    }

    pub async fn load_progress(&self) -> Result<ReportProgress, PreservationError> {
        let path = self.dir.join(PROGRESS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReportProgress::default()),
            Err(e) => Err(PreservationError::io(&path, e)),
        }
    }

    async fn save_progress(&self, progress: &ReportProgress) -> Result<(), PreservationError> {
        let bytes = serde_json::to_vec_pretty(progress)?;
        write_atomic(&self.dir.join(PROGRESS_FILE), &bytes).await
    }

    async fn ensure_dir(&self) -> Result<(), PreservationError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PreservationError::io(&self.dir, e))
    }

    /// Newest recheck output, falling back to the scan's failure list.
    async fn latest_failure_list(&self) -> Result<PathBuf, PreservationError> {
        let mut newest: Option<String> = None;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PreservationError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PreservationError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(RECHECK_PREFIX)
                && name.ends_with(".txt")
                && newest.as_deref().map_or(true, |n| name.as_str() > n)
            {
                newest = Some(name);
            }
        }

        let path = self.dir.join(newest.as_deref().unwrap_or(FAILURES_FILE));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(PreservationError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no failure list to recheck"),
            ))
        }
    }
}

/// Distinct ids from `<id>[\t<reason>]` lines, in first-seen order.
fn parse_ids(contents: &str) -> Vec<DbId> {
    let mut seen = HashSet::new();
    contents
        .lines()
        .filter_map(|line| line.split('\t').next()?.trim().parse::<DbId>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Write through a temporary sibling and rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PreservationError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| PreservationError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PreservationError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFixityEventStore, MemoryLiveRepository, MemoryPreservationStore};
    use crate::preserver::Preserver;
    use ark_cloud::memory::MemoryBackupStore;
    use ark_core::live::LiveObject;
    use ark_core::object::ObjectKind;
    use ark_core::version::LockToken;
    use ark_events::EventBus;
    use serde_json::json;

    struct Setup {
        _dir: tempfile::TempDir,
        live: Arc<MemoryLiveRepository>,
        preserver: Preserver,
        reporter: StatusReporter,
    }

    fn setup(batch_size: usize) -> Setup {
        let dir = tempfile::tempdir().unwrap();
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
        let inspector = Arc::new(ObjectInspector::new(live.clone(), records, backup));
        let reporter =
            StatusReporter::new(inspector, live.clone(), dir.path().join("report"), batch_size);
        Setup {
            _dir: dir,
            live,
            preserver,
            reporter,
        }
    }

    fn put(live: &MemoryLiveRepository, id: DbId) {
        live.put(LiveObject {
            id,
            kind: ObjectKind::Attachment,
            parent_id: None,
            lock_token: LockToken::from("v1"),
            metadata: json!({}),
            binaries: Vec::new(),
        });
    }

    #[test]
    fn parse_ids_dedupes_and_skips_junk() {
        let ids = parse_ids("3\tmissing\n3\tstale\n\n# header\n7\n");
        assert_eq!(ids, vec![3, 7]);
    }

    #[tokio::test]
    async fn scan_checkpoints_and_resumes() {
        let s = setup(2);
        for id in 1..=3 {
            put(&s.live, id);
        }
        s.preserver.preserve_object_id(1).await.unwrap();
        s.preserver.preserve_object_id(3).await.unwrap();

        let summary = s.reporter.run().await.unwrap();
        assert_eq!(summary.checked, 3);
        assert_eq!(summary.failing, vec![2]);
        let progress = s.reporter.load_progress().await.unwrap();
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.last_id, Some(3));

        // New object after the checkpoint: only it is scanned.
        put(&s.live, 4);
        let summary = s.reporter.run().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.failing, vec![2, 4]);
        let lines = tokio::fs::read_to_string(&summary.output).await.unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[tokio::test]
    async fn recheck_converges_on_residual_failures() {
        let s = setup(10);
        for id in 1..=3 {
            put(&s.live, id);
        }
        s.reporter.run().await.unwrap();

        s.preserver.preserve_object_id(1).await.unwrap();
        let first = s.reporter.recheck().await.unwrap();
        assert_eq!(first.failing, vec![2, 3]);

        s.preserver.preserve_object_id(2).await.unwrap();
        // Distinct millisecond timestamp for the next output.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = s.reporter.recheck().await.unwrap();
        assert_eq!(second.checked, 2);
        assert_eq!(second.failing, vec![3]);
        assert_ne!(first.output, second.output);
    }

    #[tokio::test]
    async fn recheck_without_a_scan_is_an_error() {
        let s = setup(10);
        s.reporter.reset().await.unwrap();
        tokio::fs::create_dir_all(&s.reporter.dir).await.unwrap();
        assert!(s.reporter.recheck().await.is_err());
    }
}

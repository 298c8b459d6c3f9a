//! Component wiring.
//!
//! [`Services::connect`] builds the PostgreSQL-backed ports from a
//! [`WorkerConfig`]; [`Services::assemble`] wires any set of ports into the
//! pipeline components, so the same graph runs against in-memory ports in
//! tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ark_core::ports::{
    AuditStore, BackupStore, BatchScheduler, FixityEventStore, LiveRepository, MessageChannel,
    Notifier, PreservationStore,
};
use ark_db::stores::{
    PgAuditStore, PgBatchScheduler, PgChannel, PgFixityEventStore, PgLiveRepository,
    PgPreservationStore,
};
use ark_events::{EmailNotifier, EventBus, EventJournal, LogNotifier};
use ark_pipeline::{
    AuditRunner, BatchRunner, FixityChecker, FixityRequestor, FixityWorker, ObjectInspector,
    PipelineConfig, Preserver, RepairCoordinator, StatusReporter,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// How long each background loop gets to stop after cancellation.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The external collaborators every component talks through.
pub struct Ports {
    pub live: Arc<dyn LiveRepository>,
    pub records: Arc<dyn PreservationStore>,
    pub events: Arc<dyn FixityEventStore>,
    pub audits: Arc<dyn AuditStore>,
    pub scheduler: Arc<dyn BatchScheduler>,
    pub channel: Arc<dyn MessageChannel>,
    pub backup: Arc<dyn BackupStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Services {
    pub config: PipelineConfig,
    pub live: Arc<dyn LiveRepository>,
    pub bus: Arc<EventBus>,
    pub preserver: Arc<Preserver>,
    pub requestor: Arc<FixityRequestor>,
    pub checker: Arc<FixityChecker>,
    pub worker: Arc<FixityWorker>,
    pub repair: Arc<RepairCoordinator>,
    pub inspector: Arc<ObjectInspector>,
    pub audit: Arc<AuditRunner>,
    pub batches: Arc<BatchRunner>,
}

impl Services {
    /// Connect to PostgreSQL and the backup store, then wire everything.
    pub async fn connect(config: &WorkerConfig) -> anyhow::Result<Self> {
        let pool = ark_db::create_pool(&config.database_url, config.max_connections)
            .await
            .context("Failed to connect to database")?;
        tracing::info!(max_connections = config.max_connections, "Database connection pool created");

        ark_db::health_check(&pool)
            .await
            .context("Database health check failed")?;
        ark_db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");

        let backup = ark_cloud::connect(&config.backup)
            .await
            .context("Failed to open backup store")?;

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => {
                tracing::info!(smtp_host = %email.smtp_host, "Audit notifications by email");
                Arc::new(EmailNotifier::new(email.clone()))
            }
            None => {
                tracing::info!("SMTP not configured, audit notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

        let ports = Ports {
            live: Arc::new(PgLiveRepository::new(pool.clone())),
            records: Arc::new(PgPreservationStore::new(pool.clone())),
            events: Arc::new(PgFixityEventStore::new(pool.clone())),
            audits: Arc::new(PgAuditStore::new(pool.clone())),
            scheduler: Arc::new(PgBatchScheduler::new(pool.clone())),
            channel: Arc::new(PgChannel::new(pool, config.pipeline.fixity.lease)),
            backup,
            notifier,
        };
        Ok(Self::assemble(ports, config.pipeline.clone()))
    }

    pub fn assemble(ports: Ports, config: PipelineConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let fixity = &config.fixity;

        let preserver = Arc::new(Preserver::new(
            ports.live.clone(),
            ports.records.clone(),
            ports.events.clone(),
            ports.backup.clone(),
            bus.clone(),
            config.cascade,
        ));
        let requestor = Arc::new(FixityRequestor::new(
            ports.records.clone(),
            ports.channel.clone(),
        ));
        let checker = Arc::new(FixityChecker::new(
            ports.backup.clone(),
            ports.channel.clone(),
            fixity.pull_batch,
        ));
        let worker = Arc::new(FixityWorker::new(
            ports.records.clone(),
            ports.events.clone(),
            ports.channel.clone(),
            bus.clone(),
            fixity.pull_batch,
        ));
        let repair = Arc::new(RepairCoordinator::new(
            ports.live.clone(),
            ports.records.clone(),
            ports.events.clone(),
            ports.backup.clone(),
            preserver.clone(),
            requestor.clone(),
            fixity.repair_cooldown,
        ));
        let inspector = Arc::new(ObjectInspector::new(
            ports.live.clone(),
            ports.records.clone(),
            ports.backup.clone(),
        ));
        let audit = Arc::new(AuditRunner::new(
            inspector.clone(),
            ports.audits,
            ports.live.clone(),
            ports.scheduler.clone(),
            ports.notifier,
            bus.clone(),
        ));
        let batches = Arc::new(BatchRunner::new(
            ports.scheduler,
            audit.clone(),
            config.batch.retry.clone(),
            config.batch.concurrency,
        ));

        Self {
            config,
            live: ports.live,
            bus,
            preserver,
            requestor,
            checker,
            worker,
            repair,
            inspector,
            audit,
            batches,
        }
    }

    /// A status reporter over `dir`, or the configured directory.
    pub fn status_reporter(&self, skip_metadata_checksum: bool, dir: Option<PathBuf>) -> StatusReporter {
        let report = &self.config.status_report;
        StatusReporter::new(
            self.inspector.clone(),
            self.live.clone(),
            dir.unwrap_or_else(|| report.dir.clone()),
            report.batch_size,
        )
        .skip_metadata_checksum(skip_metadata_checksum)
    }

    /// Spawn every long-lived loop. Each stops when `cancel` fires.
    pub fn spawn_loops(&self, cancel: &CancellationToken) -> Vec<(&'static str, JoinHandle<()>)> {
        let mut handles = Vec::new();

        handles.push((
            "event journal",
            tokio::spawn(EventJournal::run(self.bus.subscribe(), cancel.clone())),
        ));

        let requestor = self.requestor.clone();
        let (percent, period) = (
            self.config.fixity.annual_percent,
            self.config.fixity.sample_interval,
        );
        let token = cancel.clone();
        handles.push((
            "fixity schedule",
            tokio::spawn(async move { requestor.run_schedule(percent, period, token).await }),
        ));

        let checker = self.checker.clone();
        let token = cancel.clone();
        handles.push((
            "fixity checker",
            tokio::spawn(async move { checker.run(token).await }),
        ));

        let worker = self.worker.clone();
        let token = cancel.clone();
        handles.push((
            "fixity worker",
            tokio::spawn(async move { worker.run(token).await }),
        ));

        // Subscribe before spawning so no event published from here on is missed.
        let receiver = self.bus.subscribe();
        let repair = self.repair.clone();
        let token = cancel.clone();
        handles.push((
            "repair coordinator",
            tokio::spawn(async move { repair.run(receiver, token).await }),
        ));

        let batches = self.batches.clone();
        let token = cancel.clone();
        handles.push((
            "batch runner",
            tokio::spawn(async move { batches.run(token).await }),
        ));

        tracing::info!(tasks = handles.len(), "Background loops started");
        handles
    }
}

/// Wait for every loop to stop, giving each [`SHUTDOWN_GRACE`].
pub async fn join_loops(handles: Vec<(&'static str, JoinHandle<()>)>) {
    for (name, handle) in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => tracing::debug!(task = name, "Loop stopped"),
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "Loop panicked"),
            Err(_) => tracing::warn!(task = name, "Loop did not stop in time"),
        }
    }
}

//! `ark-worker` entrypoint.
//!
//! # Environment variables
//!
//! | Variable     | Required | Default                             | Description           |
//! |--------------|----------|-------------------------------------|-----------------------|
//! | `RUST_LOG`   | no       | `ark_worker=info,ark_pipeline=info` | Log filter            |
//! | `LOG_FORMAT` | no       | text                                | `json` for JSON lines |
//!
//! Storage, backup, fixity, batch and SMTP settings are documented on the
//! respective `from_env` constructors.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ark_core::ports::LiveRepository;
use ark_pipeline::{PreserveOptions, PreserveScope};
use ark_worker::cli::{AuditArgs, Cli, Command, StatusReportArgs};
use ark_worker::config::{json_logs, WorkerConfig};
use ark_worker::services::{join_loops, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;
    let services = Services::connect(&config).await?;

    match cli.command {
        Command::Run => run(&services).await,
        Command::Sample { percent } => {
            let percent = percent.unwrap_or(services.config.fixity.annual_percent);
            let sampled = services.requestor.queue_daily_sample(percent).await?;
            println!("Queued verification for {sampled} records");
            Ok(())
        }
        Command::Check { record_id } => {
            let queued = services.requestor.queue_resource_check(record_id).await?;
            println!("Queued {queued} verification requests for record {record_id}");
            Ok(())
        }
        Command::Audit(args) => audit(&services, args).await,
        Command::StatusReport(args) => status_report(&services, args).await,
        Command::Preserve {
            object_id,
            force,
            no_cascade,
        } => {
            let object = services
                .live
                .find(object_id)
                .await?
                .with_context(|| format!("Live object {object_id} not found"))?;
            let options = PreserveOptions {
                scope: PreserveScope::Everything,
                force,
                cascade: services.config.cascade && !no_cascade,
            };
            let record = services.preserver.preserve_with(&object, options).await?;
            println!(
                "Preserved object {object_id} as record {} ({} binaries)",
                record.id,
                record.binary_nodes.len()
            );
            Ok(())
        }
        Command::Delete { object_id } => {
            if services.preserver.on_delete(object_id).await? {
                println!("Removed preserved state of object {object_id}");
            } else {
                println!("Object {object_id} was never preserved");
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ark_worker=info,ark_pipeline=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(services: &Services) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let handles = services.spawn_loops(&cancel);

    shutdown_signal().await;
    cancel.cancel();
    join_loops(handles).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn audit(services: &Services, args: AuditArgs) -> anyhow::Result<()> {
    let audit = services
        .audit
        .run(args.scope(), args.skip_metadata_checksum)
        .await?;
    println!(
        "Audit {} started over {} objects ({})",
        audit.id,
        audit.object_count,
        audit.extent.as_str()
    );
    if !args.wait {
        return Ok(());
    }

    if audit.batch_id.is_some() {
        services.batches.drain().await?;
    }
    let (audit, failures) = services.audit.summary(audit.id).await?;
    println!("Audit {} {}: {} failures", audit.id, audit.status, failures.len());
    for failure in failures {
        println!("{}\t{}", failure.resource_id, failure.reason);
    }
    Ok(())
}

async fn status_report(services: &Services, args: StatusReportArgs) -> anyhow::Result<()> {
    let reporter = services.status_reporter(args.skip_metadata_checksum, args.dir);
    if args.restart {
        reporter.reset().await?;
    }
    let summary = if args.recheck {
        reporter.recheck().await?
    } else {
        reporter.run().await?
    };
    println!(
        "Checked {} objects, {} failing; see {}",
        summary.checked,
        summary.failing.len(),
        summary.output.display()
    );
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

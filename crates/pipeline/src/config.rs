//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ark_core::batch::RetryPolicy;

/// Parse `name` from the environment, falling back to `default` when the
/// variable is unset or unparseable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(name, default))
}

// ---------------------------------------------------------------------------
// Fixity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FixityConfig {
    /// Share of the corpus to verify per year, in percent.
    pub annual_percent: f64,
    pub sample_interval: Duration,
    /// Messages pulled per channel poll.
    pub pull_batch: usize,
    /// How long a pulled message stays leased before redelivery.
    pub lease: Duration,
    /// Minimum gap between automated repairs of the same node.
    pub repair_cooldown: Duration,
}

impl Default for FixityConfig {
    fn default() -> Self {
        Self {
            annual_percent: 25.0,
            sample_interval: Duration::from_secs(86_400),
            pull_batch: 32,
            lease: Duration::from_secs(300),
            repair_cooldown: Duration::from_secs(86_400),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub retry: RetryPolicy,
    /// Jobs executed in parallel by the batch runner.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatusReportConfig {
    pub dir: PathBuf,
    /// Objects checked between progress checkpoints.
    pub batch_size: usize,
}

impl Default for StatusReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./status-report"),
            batch_size: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether preserving a cascading container also preserves its
    /// committed children.
    pub cascade: bool,
    pub fixity: FixityConfig,
    pub batch: BatchConfig,
    pub status_report: StatusReportConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cascade: true,
            fixity: FixityConfig::default(),
            batch: BatchConfig::default(),
            status_report: StatusReportConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                      | Default           |
    /// |-------------------------------|-------------------|
    /// | `PRESERVE_CASCADE`            | `true`            |
    /// | `FIXITY_ANNUAL_PERCENT`       | `25`              |
    /// | `FIXITY_SAMPLE_INTERVAL_SECS` | `86400`           |
    /// | `FIXITY_PULL_BATCH`           | `32`              |
    /// | `FIXITY_LEASE_SECS`           | `300`             |
    /// | `REPAIR_COOLDOWN_SECS`        | `86400`           |
    /// | `BATCH_MAX_RETRIES`           | `5`               |
    /// | `BATCH_RETRY_BACKOFF_SECS`    | `30`              |
    /// | `BATCH_CONCURRENCY`           | `8`               |
    /// | `STATUS_REPORT_DIR`           | `./status-report` |
    /// | `STATUS_REPORT_BATCH`         | `500`             |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_retries: env_or("BATCH_MAX_RETRIES", defaults.batch.retry.max_retries),
            base_backoff: env_secs(
                "BATCH_RETRY_BACKOFF_SECS",
                defaults.batch.retry.base_backoff.as_secs(),
            ),
            ..defaults.batch.retry
        };
        Self {
            cascade: env_or("PRESERVE_CASCADE", defaults.cascade),
            fixity: FixityConfig {
                annual_percent: env_or("FIXITY_ANNUAL_PERCENT", defaults.fixity.annual_percent),
                sample_interval: env_secs(
                    "FIXITY_SAMPLE_INTERVAL_SECS",
                    defaults.fixity.sample_interval.as_secs(),
                ),
                pull_batch: env_or("FIXITY_PULL_BATCH", defaults.fixity.pull_batch).max(1),
                lease: env_secs("FIXITY_LEASE_SECS", defaults.fixity.lease.as_secs()),
                repair_cooldown: env_secs(
                    "REPAIR_COOLDOWN_SECS",
                    defaults.fixity.repair_cooldown.as_secs(),
                ),
            },
            batch: BatchConfig {
                retry,
                concurrency: env_or("BATCH_CONCURRENCY", defaults.batch.concurrency).max(1),
            },
            status_report: StatusReportConfig {
                dir: std::env::var("STATUS_REPORT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.status_report.dir),
                batch_size: env_or("STATUS_REPORT_BATCH", defaults.status_report.batch_size)
                    .max(1),
            },
        }
    }
}

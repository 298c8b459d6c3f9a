//! Process configuration loaded from environment variables.

use anyhow::Context;
use ark_cloud::BackupConfig;
use ark_events::EmailConfig;
use ark_pipeline::PipelineConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub backup: BackupConfig,
    pub pipeline: PipelineConfig,
    /// Absent when SMTP is not configured; notifications then go to the log.
    pub email: Option<EmailConfig>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                   | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `DATABASE_URL`             | yes      | --      |
    /// | `DATABASE_MAX_CONNECTIONS` | no       | `20`    |
    ///
    /// Backup, pipeline and SMTP settings are read by
    /// [`BackupConfig::from_env`], [`PipelineConfig::from_env`] and
    /// [`EmailConfig::from_env`].
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(value) => value
                .trim()
                .parse()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be a u32, got {value:?}"))?,
            Err(_) => ark_db::DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            database_url,
            max_connections,
            backup: BackupConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            email: EmailConfig::from_env(),
        })
    }
}

/// `LOG_FORMAT=json` switches the log output to JSON lines.
pub fn json_logs() -> bool {
    std::env::var("LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

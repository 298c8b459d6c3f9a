//! Command-line interface.

use std::path::PathBuf;

use ark_core::audit::AuditScope;
use ark_core::types::DbId;
use clap::{Args, Parser, Subcommand};

/// Digital preservation worker.
#[derive(Parser, Debug)]
#[command(name = "ark-worker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the fixity schedule, checker, worker, repair coordinator and
    /// batch runner until SIGINT or SIGTERM.
    Run,

    /// Queue today's fixity sample now.
    Sample {
        /// Share of the corpus verified per year, in percent. Defaults to
        /// `FIXITY_ANNUAL_PERCENT`.
        #[arg(long)]
        percent: Option<f64>,
    },

    /// Queue verification of every node of one preservation record.
    Check {
        record_id: DbId,
    },

    /// Start a batch-tracked preservation audit.
    Audit(AuditArgs),

    /// Resumable full-corpus status report written to local files.
    StatusReport(StatusReportArgs),

    /// Preserve one live object.
    Preserve {
        object_id: DbId,
        /// Re-upload even when the preserved copies are current.
        #[arg(long)]
        force: bool,
        /// Do not cascade to committed children.
        #[arg(long)]
        no_cascade: bool,
    },

    /// Remove an object's preservation record and preserved copies.
    Delete {
        object_id: DbId,
    },
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Only re-check the objects that failed in this earlier audit.
    #[arg(long, value_name = "AUDIT_ID")]
    pub ids_from: Option<DbId>,

    /// Check metadata copies for presence only.
    #[arg(long)]
    pub skip_metadata_checksum: bool,

    /// Execute the audit's jobs in this process and print the result.
    #[arg(long)]
    pub wait: bool,
}

impl AuditArgs {
    pub fn scope(&self) -> AuditScope {
        match self.ids_from {
            Some(previous) => AuditScope::IdsFrom(previous),
            None => AuditScope::Full,
        }
    }
}

#[derive(Args, Debug)]
pub struct StatusReportArgs {
    /// Re-check only the ids in the newest failure list.
    #[arg(long)]
    pub recheck: bool,

    /// Discard saved progress and scan from the first object.
    #[arg(long, conflicts_with = "recheck")]
    pub restart: bool,

    /// Check metadata copies for presence only.
    #[arg(long)]
    pub skip_metadata_checksum: bool,

    /// State directory. Defaults to `STATUS_REPORT_DIR`.
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

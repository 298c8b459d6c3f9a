//! Preservation pipeline: the components that write, verify and repair
//! preserved copies.
//!
//! - [`Preserver`] creates and refreshes Preservation Records.
//! - [`FixityRequestor`] samples or targets records and queues verification
//!   requests; [`FixityChecker`] answers them; [`FixityWorker`] records the
//!   results as fixity events.
//! - [`RepairCoordinator`] reacts to verification failures.
//! - [`AuditRunner`] runs batch-tracked audits on top of [`BatchRunner`].
//! - [`StatusReporter`] is the resumable, file-backed full-corpus scan.
//!
//! Every collaborator is an `ark_core::ports` trait object; the
//! `test-support` feature adds in-process implementations in `memory`.

pub mod audit;
pub mod backoff;
pub mod batch;
pub mod checker;
pub mod config;
pub mod error;
pub mod inspect;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod preserver;
pub mod repair;
pub mod requestor;
pub mod status_report;
pub mod worker;

pub use audit::AuditRunner;
pub use batch::{BatchJobHandler, BatchRunner};
pub use checker::FixityChecker;
pub use config::PipelineConfig;
pub use error::PreservationError;
pub use inspect::ObjectInspector;
pub use preserver::{PreserveOptions, PreserveScope, Preserver};
pub use repair::{RepairCoordinator, RepairOutcome};
pub use requestor::FixityRequestor;
pub use status_report::StatusReporter;
pub use worker::FixityWorker;

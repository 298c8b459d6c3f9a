//! PostgreSQL implementations of the `ark_core::ports` traits.
//!
//! Each adapter owns a pool clone, delegates to the repositories and maps
//! `sqlx::Error` through [`crate::store_error`].

mod audit;
mod batch;
mod channel;
mod fixity;
mod live;
mod preservation;

pub use audit::PgAuditStore;
pub use batch::PgBatchScheduler;
pub use channel::PgChannel;
pub use fixity::PgFixityEventStore;
pub use live::PgLiveRepository;
pub use preservation::PgPreservationStore;

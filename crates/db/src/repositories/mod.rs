//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod audit_repo;
pub mod batch_repo;
pub mod channel_repo;
pub mod fixity_event_repo;
pub mod live_object_repo;
pub mod preservation_record_repo;

pub use audit_repo::AuditRepo;
pub use batch_repo::BatchRepo;
pub use channel_repo::ChannelRepo;
pub use fixity_event_repo::FixityEventRepo;
pub use live_object_repo::LiveObjectRepo;
pub use preservation_record_repo::PreservationRecordRepo;

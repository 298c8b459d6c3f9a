//! Preservation event bus, message channel and operator notifications.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`PreservationEvent`]s.
//! - [`EventJournal`]: background subscriber that writes every event to
//!   the structured log.
//! - [`MemoryChannel`]: in-process at-least-once message channel.
//! - [`delivery`]: notifier implementations (email, log, in-memory).

pub mod bus;
pub mod channel;
pub mod delivery;
pub mod journal;

pub use bus::{EventBus, PreservationEvent};
pub use channel::MemoryChannel;
pub use delivery::email::{EmailConfig, EmailNotifier};
pub use delivery::log::LogNotifier;
pub use delivery::memory::MemoryNotifier;
pub use journal::EventJournal;

//! `reloc-middleware` – message plumbing for the relocalization stack.
//!
//! Routes data between the marker detector, the frame graph and the pose
//! estimator without caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`sink`] – The [`PoseSink`] emission boundary and its bus-backed and
//!   in-memory implementations.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sink::{BusPoseSink, MemorySink, PoseSink};

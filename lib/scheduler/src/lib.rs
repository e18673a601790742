//! Scheduler for workflow listeners.
//!
//! This crate provides:
//!
//! - **Checkpoints**: Durable per-listener poll progress and the store trait
//! - **Event Poller**: Fair, sequential polling of listeners that hands new
//!   events to the trigger ingress

pub mod checkpoint;
pub mod error;
pub mod poller;

pub use checkpoint::{CheckpointStore, ListenerJob, TriggerCheckpoint};
pub use error::PollError;
pub use poller::{EventPoller, NodeOutcome, PollSummary, PollerConfig};

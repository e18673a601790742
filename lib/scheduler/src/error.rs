//! Error types for the scheduler crate.

use conduit_core::StoreError;
use conduit_integration::{CredentialError, EventSourceError};
use conduit_workflow::{NodeId, TransportError};
use std::fmt;

/// Why polling one listener node failed.
///
/// None of these abort a poll cycle; the node is retried next cycle with its
/// checkpoint untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The listener has no credential to poll with.
    MissingCredential { node_id: NodeId },
    /// No valid access token could be obtained.
    Credential(CredentialError),
    /// The upstream event API failed.
    Source(EventSourceError),
    /// The trigger request could not be delivered.
    Trigger(TransportError),
    /// The ingress refused the run.
    NotAccepted { node_id: NodeId },
    /// Reading or writing the checkpoint failed.
    Store(StoreError),
    /// A call exceeded the poller's call timeout.
    Timeout { operation: &'static str },
}

impl PollError {
    /// Whether the user has to reconnect the account before polling can succeed.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::Credential(e) => e.requires_reauthorization(),
            Self::Source(EventSourceError::Authentication { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential { node_id } => {
                write!(f, "listener {node_id} has no credential")
            }
            Self::Credential(e) => write!(f, "credential unavailable: {e}"),
            Self::Source(e) => write!(f, "event source failed: {e}"),
            Self::Trigger(e) => write!(f, "trigger delivery failed: {e}"),
            Self::NotAccepted { node_id } => {
                write!(f, "trigger for listener {node_id} was not accepted")
            }
            Self::Store(e) => write!(f, "checkpoint store failed: {e}"),
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
        }
    }
}

impl std::error::Error for PollError {}

impl From<CredentialError> for PollError {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}

impl From<EventSourceError> for PollError {
    fn from(e: EventSourceError) -> Self {
        Self::Source(e)
    }
}

impl From<TransportError> for PollError {
    fn from(e: TransportError) -> Self {
        Self::Trigger(e)
    }
}

impl From<StoreError> for PollError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

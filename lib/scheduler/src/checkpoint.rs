//! Per-listener poll progress.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use conduit_core::{CredentialId, StoreError};
use conduit_workflow::NodeId;
use serde::{Deserialize, Serialize};

/// Durable marker of how far a listener node has been polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCheckpoint {
    pub node_id: NodeId,
    /// When the upstream API was last observed successfully.
    pub last_check_at: DateTime<Utc>,
    /// The newest event already triggered, used to suppress redelivery.
    pub last_message_id: Option<String>,
}

impl TriggerCheckpoint {
    #[must_use]
    pub fn new(
        node_id: NodeId,
        last_check_at: DateTime<Utc>,
        last_message_id: Option<String>,
    ) -> Self {
        Self {
            node_id,
            last_check_at,
            last_message_id,
        }
    }
}

/// A listener node due for polling, with its checkpoint if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerJob {
    pub node_id: NodeId,
    pub credential_id: Option<CredentialId>,
    pub checkpoint: Option<TriggerCheckpoint>,
}

impl ListenerJob {
    /// Start of the query window: the last check minus `look_back`, or the
    /// Unix epoch for a listener that was never polled.
    #[must_use]
    pub fn poll_since(&self, look_back: TimeDelta) -> DateTime<Utc> {
        self.checkpoint.as_ref().map_or(DateTime::<Utc>::UNIX_EPOCH, |c| {
            c.last_check_at
                .checked_sub_signed(look_back)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        })
    }

    #[must_use]
    pub fn last_message_id(&self) -> Option<&str> {
        self.checkpoint
            .as_ref()
            .and_then(|c| c.last_message_id.as_deref())
    }
}

/// Persistence for listener checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Up to `limit` listener nodes of `service`, least recently polled
    /// first. Never-polled listeners sort before all others.
    async fn due_listeners(
        &self,
        service: &str,
        limit: usize,
    ) -> Result<Vec<ListenerJob>, StoreError>;

    /// Inserts or replaces the checkpoint for its node.
    async fn upsert(&self, checkpoint: &TriggerCheckpoint) -> Result<(), StoreError>;
}

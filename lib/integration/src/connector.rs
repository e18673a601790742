//! Event source trait for trigger-capable integrations.
//!
//! A listener node watches one event source. The poller asks the source for
//! the newest event since a point in time and, when it is new, fetches the
//! normalized payload that seeds a workflow run.

use crate::error::EventSourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A detected third-party event, normalized for a workflow's trigger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The upstream event identifier, used for deduplication.
    pub id: String,
    /// The payload stored under `trigger` in the run's execution state.
    pub payload: JsonValue,
}

/// Uniform interface over third-party event APIs.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Service name this source serves, e.g. "gmail".
    fn service(&self) -> &str;

    /// Returns the identifier of the newest event after `since`, if any.
    async fn newest_event_id(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, EventSourceError>;

    /// Fetches one event and normalizes it into a trigger payload.
    async fn fetch_event(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<TriggerEvent, EventSourceError>;
}

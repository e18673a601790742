//! Event poller.
//!
//! Each cycle takes a bounded batch of listener nodes, oldest checkpoint
//! first, and polls them one after another against the event source. New
//! events are handed to the trigger ingress; the poller never waits for the
//! resulting runs.
//!
//! A checkpoint only moves after the upstream API was observed successfully,
//! so a failed poll retries the same window next cycle.

use crate::checkpoint::{CheckpointStore, ListenerJob, TriggerCheckpoint};
use crate::error::PollError;
use chrono::{DateTime, TimeDelta, Utc};
use conduit_core::WorkflowRunId;
use conduit_integration::{AccessTokenSource, EventSource};
use conduit_workflow::{TriggerRequest, TriggerSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and batching for the poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Listener nodes polled per cycle.
    pub batch_size: usize,
    /// Slack subtracted from the last check to tolerate clock skew and late
    /// delivery.
    pub look_back: Duration,
    /// Upper bound on every outbound call.
    pub call_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            batch_size: 10,
            look_back: Duration::from_secs(120),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to one listener node in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// A new event was handed to the ingress.
    Triggered { run_id: Option<WorkflowRunId> },
    /// The newest event was already triggered.
    Duplicate,
    /// Nothing new upstream.
    NoEvents,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub triggered: usize,
    pub duplicates: usize,
    pub empty: usize,
    pub failed: usize,
}

/// Polls listener nodes of one service and triggers their workflows.
pub struct EventPoller {
    checkpoints: Arc<dyn CheckpointStore>,
    tokens: Arc<dyn AccessTokenSource>,
    source: Arc<dyn EventSource>,
    triggers: Arc<dyn TriggerSink>,
    config: PollerConfig,
}

impl EventPoller {
    #[must_use]
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        tokens: Arc<dyn AccessTokenSource>,
        source: Arc<dyn EventSource>,
        triggers: Arc<dyn TriggerSink>,
        config: PollerConfig,
    ) -> Self {
        Self {
            checkpoints,
            tokens,
            source,
            triggers,
            config,
        }
    }

    /// Polls every `interval` until `shutdown` resolves.
    ///
    /// A cycle in progress when shutdown fires is finished first.
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send) {
        // `tokio::time::interval` panics on a zero period.
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            service = self.source.service(),
            interval_seconds = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "event poller started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.poll_once().await {
                warn!(service = self.source.service(), error = %e, "poll cycle skipped");
            }
        }

        debug!(service = self.source.service(), "event poller stopped");
    }

    /// Runs one poll cycle.
    ///
    /// # Errors
    ///
    /// Fails only when the batch itself cannot be loaded; per-node failures
    /// are logged and counted.
    pub async fn poll_once(&self) -> Result<PollSummary, PollError> {
        self.poll_at(Utc::now()).await
    }

    async fn poll_at(&self, now: DateTime<Utc>) -> Result<PollSummary, PollError> {
        let service = self.source.service();
        let jobs = self
            .bounded(
                "checkpoint batch",
                self.checkpoints
                    .due_listeners(service, self.config.batch_size),
            )
            .await?;

        let mut summary = PollSummary::default();
        for job in jobs {
            summary.polled += 1;
            match self.poll_node(&job, now).await {
                Ok(NodeOutcome::Triggered { run_id }) => {
                    summary.triggered += 1;
                    debug!(
                        node_id = %job.node_id,
                        run_id = %run_id.map(|id| id.to_string()).unwrap_or_default(),
                        "listener triggered"
                    );
                }
                Ok(NodeOutcome::Duplicate) => summary.duplicates += 1,
                Ok(NodeOutcome::NoEvents) => summary.empty += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        node_id = %job.node_id,
                        credential_id = %job.credential_id.map(|id| id.to_string()).unwrap_or_default(),
                        reauthorization_required = e.requires_reauthorization(),
                        error = %e,
                        "listener poll failed"
                    );
                }
            }
        }

        info!(
            service,
            polled = summary.polled,
            triggered = summary.triggered,
            duplicates = summary.duplicates,
            empty = summary.empty,
            failed = summary.failed,
            "poll cycle finished"
        );
        Ok(summary)
    }

    async fn poll_node(
        &self,
        job: &ListenerJob,
        now: DateTime<Utc>,
    ) -> Result<NodeOutcome, PollError> {
        let credential_id = job.credential_id.ok_or_else(|| PollError::MissingCredential {
            node_id: job.node_id.clone(),
        })?;
        let token = self
            .bounded("access token", self.tokens.access_token(credential_id))
            .await?;

        let since = job.poll_since(self.look_back());
        let newest = self
            .bounded(
                "event lookup",
                self.source.newest_event_id(&token, since),
            )
            .await?;

        let previous = job.last_message_id().map(str::to_string);
        let Some(event_id) = newest else {
            self.advance(job, now, previous).await?;
            return Ok(NodeOutcome::NoEvents);
        };
        if previous.as_deref() == Some(event_id.as_str()) {
            self.advance(job, now, previous).await?;
            return Ok(NodeOutcome::Duplicate);
        }

        let event = self
            .bounded("event fetch", self.source.fetch_event(&token, &event_id))
            .await?;
        let ack = self
            .bounded(
                "trigger",
                self.triggers.trigger(TriggerRequest {
                    trigger_node_id: job.node_id.clone(),
                    payload: event.payload.to_string(),
                }),
            )
            .await?;
        if !ack.accepted {
            return Err(PollError::NotAccepted {
                node_id: job.node_id.clone(),
            });
        }

        self.advance(job, now, Some(event.id)).await?;
        Ok(NodeOutcome::Triggered { run_id: ack.run_id })
    }

    async fn advance(
        &self,
        job: &ListenerJob,
        now: DateTime<Utc>,
        last_message_id: Option<String>,
    ) -> Result<(), PollError> {
        let checkpoint = TriggerCheckpoint::new(job.node_id.clone(), now, last_message_id);
        self.bounded("checkpoint update", self.checkpoints.upsert(&checkpoint))
            .await?;
        Ok(())
    }

    fn look_back(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.look_back).unwrap_or(TimeDelta::zero())
    }

    async fn bounded<T, E>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, PollError>
    where
        PollError: From<E>,
    {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| PollError::Timeout { operation })?
            .map_err(PollError::from)
    }
}

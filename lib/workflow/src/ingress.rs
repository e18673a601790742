//! Trigger ingress: a bounded worker pool in front of the execution engine.
//!
//! `trigger` only enqueues; callers learn whether the run was scheduled, not
//! how it ended. Completed runs are published on a broadcast channel for
//! anyone who wants to observe them.

use crate::engine::ExecutionEngine;
use crate::error::{ErrorKind, TransportError};
use crate::node::NodeId;
use async_trait::async_trait;
use conduit_core::{WorkflowId, WorkflowRunId};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Request to start a run from a listener node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub trigger_node_id: NodeId,
    /// Event payload as JSON text; parsed by the engine.
    pub payload: String,
}

/// Acknowledgement of a trigger request.
///
/// `accepted` means the run was scheduled, not that it succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerAck {
    pub accepted: bool,
    #[serde(default)]
    pub run_id: Option<WorkflowRunId>,
}

impl TriggerAck {
    #[must_use]
    pub fn accepted(run_id: WorkflowRunId) -> Self {
        Self {
            accepted: true,
            run_id: Some(run_id),
        }
    }

    #[must_use]
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            run_id: None,
        }
    }
}

/// Anything that accepts trigger requests, in-process or remote.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn trigger(&self, request: TriggerRequest) -> Result<TriggerAck, TransportError>;
}

/// How a scheduled run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        workflow_id: WorkflowId,
        nodes_executed: usize,
    },
    Failed {
        workflow_id: Option<WorkflowId>,
        node_id: Option<NodeId>,
        kind: ErrorKind,
        message: String,
    },
    /// The run exceeded its time budget and was abandoned.
    TimedOut,
}

/// Published once per scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: WorkflowRunId,
    pub trigger_node_id: NodeId,
    pub outcome: RunOutcome,
}

/// Sizing and limits for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct IngressConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub run_timeout: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            run_timeout: Duration::from_secs(300),
        }
    }
}

struct QueuedRun {
    run_id: WorkflowRunId,
    request: TriggerRequest,
}

/// Bounded queue plus a fixed set of workers executing runs.
pub struct TriggerIngress {
    sender: Mutex<Option<mpsc::Sender<QueuedRun>>>,
    reports: broadcast::Sender<RunReport>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerIngress {
    /// Spawns the worker pool. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(engine: Arc<ExecutionEngine>, config: IngressConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (reports, _) = broadcast::channel(config.queue_capacity.max(16));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    engine.clone(),
                    receiver.clone(),
                    reports.clone(),
                    config.run_timeout,
                ))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            reports,
            workers: Mutex::new(workers),
        }
    }

    /// Schedules a run without waiting.
    ///
    /// Returns a rejected ack when the queue is full or the pool has shut down.
    pub fn submit(&self, request: TriggerRequest) -> TriggerAck {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            warn!(trigger_node_id = %request.trigger_node_id, "trigger rejected, ingress shut down");
            return TriggerAck::rejected();
        };

        let run_id = WorkflowRunId::new();
        let trigger_node_id = request.trigger_node_id.clone();
        match sender.try_send(QueuedRun { run_id, request }) {
            Ok(()) => {
                debug!(run_id = %run_id, trigger_node_id = %trigger_node_id, "run queued");
                TriggerAck::accepted(run_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(trigger_node_id = %trigger_node_id, "trigger rejected, run queue full");
                TriggerAck::rejected()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(trigger_node_id = %trigger_node_id, "trigger rejected, run queue closed");
                TriggerAck::rejected()
            }
        }
    }

    /// Subscribes to reports of runs finishing after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.reports.subscribe()
    }

    /// Stops accepting triggers and waits for queued and in-flight runs.
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "ingress worker panicked");
            }
        }
    }
}

#[async_trait]
impl TriggerSink for TriggerIngress {
    async fn trigger(&self, request: TriggerRequest) -> Result<TriggerAck, TransportError> {
        Ok(self.submit(request))
    }
}

async fn worker_loop(
    worker: usize,
    engine: Arc<ExecutionEngine>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedRun>>>,
    reports: broadcast::Sender<RunReport>,
    run_timeout: Duration,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(QueuedRun { run_id, request }) = next else {
            debug!(worker, "ingress worker stopping");
            return;
        };

        // A panicking run must not take the worker down with it.
        let run = AssertUnwindSafe(engine.run_with_id(
            run_id,
            &request.trigger_node_id,
            &request.payload,
        ))
        .catch_unwind();

        let outcome = match tokio::time::timeout(run_timeout, run).await {
            Ok(Ok(Ok(summary))) => RunOutcome::Succeeded {
                workflow_id: summary.workflow_id,
                nodes_executed: summary.executed.len(),
            },
            Ok(Ok(Err(failure))) => RunOutcome::Failed {
                workflow_id: failure.workflow_id,
                node_id: failure.node_id,
                kind: failure.error.kind(),
                message: failure.error.to_string(),
            },
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(
                    run_id = %run_id,
                    trigger_node_id = %request.trigger_node_id,
                    error_kind = %ErrorKind::StepExecution,
                    error = %message,
                    "workflow run panicked"
                );
                RunOutcome::Failed {
                    workflow_id: None,
                    node_id: None,
                    kind: ErrorKind::StepExecution,
                    message: format!("run panicked: {message}"),
                }
            }
            Err(_) => {
                error!(
                    run_id = %run_id,
                    trigger_node_id = %request.trigger_node_id,
                    error_kind = %ErrorKind::Timeout,
                    timeout_secs = run_timeout.as_secs(),
                    "workflow run abandoned after timeout"
                );
                RunOutcome::TimedOut
            }
        };

        // No subscribers is fine.
        let _ = reports.send(RunReport {
            run_id,
            trigger_node_id: request.trigger_node_id,
            outcome,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

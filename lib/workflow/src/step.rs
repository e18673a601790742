//! Step executor: performs one node's side effect.
//!
//! Actions resolve a credential, template their configuration against the
//! run's state and dispatch to the task worker for their service.
//! Transformers run in-process.

use crate::error::{StepError, TransportError};
use crate::node::{Node, NodeKind};
use crate::state::ExecutionState;
use crate::template::resolve_config;
use async_trait::async_trait;
use conduit_integration::AccessTokenSource;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Request sent to a task worker.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    pub config: JsonValue,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("task", &self.task)
            .field("config", &self.config)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reply from a task worker.
///
/// `output` carries the worker's result as JSON text; empty means no output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_message: String,
}

impl TaskResponse {
    /// A successful reply carrying `output`.
    #[must_use]
    pub fn ok(output: &JsonValue) -> Self {
        Self {
            success: true,
            output: output.to_string(),
            error_message: String::new(),
        }
    }

    /// A failed reply.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error_message: message.into(),
        }
    }
}

/// Delivers task requests to the worker for a service.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        service: &str,
        request: TaskRequest,
    ) -> Result<TaskResponse, TransportError>;
}

/// Executes a single node against the current execution state.
///
/// The engine only depends on this trait, which lets tests substitute
/// scripted runners.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs `node` and returns its output fragment.
    async fn run_step(&self, node: &Node, state: &ExecutionState)
    -> Result<JsonValue, StepError>;
}

/// Production step runner.
pub struct StepExecutor {
    tokens: Arc<dyn AccessTokenSource>,
    dispatcher: Arc<dyn TaskDispatcher>,
    step_timeout: Duration,
}

impl StepExecutor {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn AccessTokenSource>,
        dispatcher: Arc<dyn TaskDispatcher>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            dispatcher,
            step_timeout,
        }
    }

    async fn run_action(
        &self,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<JsonValue, StepError> {
        let auth_token = match node.credential_id {
            Some(credential_id) => Some(
                self.tokens
                    .access_token(credential_id)
                    .await
                    .map_err(StepError::Credential)?,
            ),
            None => None,
        };

        let config = resolve_config(&node.config, state)?;
        let request = TaskRequest {
            task: node.task.clone(),
            config,
            auth_token,
        };

        let response = tokio::time::timeout(
            self.step_timeout,
            self.dispatcher.dispatch(&node.service, request),
        )
        .await
        .map_err(|_| StepError::Timeout)??;

        if !response.success {
            return Err(StepError::Rejected {
                message: response.error_message,
            });
        }

        parse_output(&response.output)
    }

    async fn run_transformer(
        &self,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<JsonValue, StepError> {
        let config = resolve_config(&node.config, state)?;
        match node.task.as_str() {
            "map" => Ok(config),
            "delay" => {
                let seconds = config
                    .get("seconds")
                    .and_then(JsonValue::as_f64)
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .ok_or_else(|| StepError::InvalidConfig {
                        reason: "delay requires a non-negative \"seconds\" number".to_string(),
                    })?;
                let delay = Duration::try_from_secs_f64(seconds).map_err(|e| {
                    StepError::InvalidConfig {
                        reason: format!("delay of {seconds} seconds: {e}"),
                    }
                })?;
                tokio::time::timeout(self.step_timeout, tokio::time::sleep(delay))
                .await
                .map_err(|_| StepError::Timeout)?;
                Ok(json!({"status": "delayed"}))
            }
            other => Err(StepError::UnsupportedTask {
                kind: NodeKind::Transformer.to_string(),
                task: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl StepRunner for StepExecutor {
    async fn run_step(
        &self,
        node: &Node,
        state: &ExecutionState,
    ) -> Result<JsonValue, StepError> {
        debug!(node_id = %node.id, kind = %node.kind, service = %node.service, task = %node.task, "running step");
        match node.kind {
            NodeKind::Action => self.run_action(node, state).await,
            NodeKind::Transformer => self.run_transformer(node, state).await,
            NodeKind::Listener | NodeKind::Unrecognized => Err(StepError::UnsupportedTask {
                kind: node.kind.to_string(),
                task: node.task.clone(),
            }),
        }
    }
}

/// Parses a worker's output text; blank output becomes `null`.
fn parse_output(output: &str) -> Result<JsonValue, StepError> {
    if output.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(output).map_err(|e| StepError::InvalidOutput {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{CredentialId, WorkflowId};
    use conduit_integration::CredentialError;
    use std::sync::Mutex;

    struct StaticTokens {
        token: Result<String, CredentialError>,
    }

    #[async_trait]
    impl AccessTokenSource for StaticTokens {
        async fn access_token(&self, _id: CredentialId) -> Result<String, CredentialError> {
            self.token.clone()
        }
    }

    /// Records requests and answers with a fixed reply.
    struct RecordingDispatcher {
        reply: Result<TaskResponse, TransportError>,
        delay: Duration,
        requests: Mutex<Vec<(String, TaskRequest)>>,
    }

    impl RecordingDispatcher {
        fn replying(reply: Result<TaskResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            service: &str,
            request: TaskRequest,
        ) -> Result<TaskResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((service.to_string(), request));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn executor(
        token: Result<String, CredentialError>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> StepExecutor {
        StepExecutor::new(
            Arc::new(StaticTokens { token }),
            dispatcher,
            Duration::from_millis(200),
        )
    }

    fn action(config: JsonValue) -> Node {
        Node::new("send", WorkflowId::new(), NodeKind::Action, "gmail", "send_email")
            .with_config(config)
            .with_credential(CredentialId::new())
    }

    fn state() -> ExecutionState {
        ExecutionState::new(json!({"email_from": "alice@example.com"}))
    }

    #[tokio::test]
    async fn action_dispatches_resolved_config_with_token() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!({"sent": true}))));
        let runner = executor(Ok("token-1".to_string()), dispatcher.clone());

        let output = runner
            .run_step(&action(json!({"to": "{{ trigger.email_from }}"})), &state())
            .await
            .expect("step");

        assert_eq!(output, json!({"sent": true}));
        let requests = dispatcher.requests.lock().unwrap();
        let (service, request) = &requests[0];
        assert_eq!(service, "gmail");
        assert_eq!(request.task, "send_email");
        assert_eq!(request.config, json!({"to": "alice@example.com"}));
        assert_eq!(request.auth_token.as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn action_without_credential_sends_no_token() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("unused".to_string()), dispatcher.clone());
        let node = Node::new("hook", WorkflowId::new(), NodeKind::Action, "http", "post");

        runner.run_step(&node, &state()).await.expect("step");
        assert_eq!(dispatcher.requests.lock().unwrap()[0].1.auth_token, None);
    }

    #[tokio::test]
    async fn credential_failure_aborts_before_dispatch() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(
            Err(CredentialError::Revoked {
                id: CredentialId::new(),
                reason: "invalid_grant".to_string(),
            }),
            dispatcher.clone(),
        );

        let err = runner.run_step(&action(json!({})), &state()).await.unwrap_err();
        assert!(matches!(err, StepError::Credential(_)));
        assert!(dispatcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolved_variable_aborts_before_dispatch() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("t".to_string()), dispatcher.clone());

        let err = runner
            .run_step(&action(json!({"to": "{{ previous.address }}"})), &state())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Template(_)));
        assert!(dispatcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_failure_is_rejected() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::failed("mailbox full")));
        let runner = executor(Ok("t".to_string()), dispatcher);

        let err = runner.run_step(&action(json!({})), &state()).await.unwrap_err();
        assert_eq!(
            err,
            StepError::Rejected {
                message: "mailbox full".to_string()
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let dispatcher = RecordingDispatcher::replying(Err(TransportError::RequestFailed {
            message: "no responders".to_string(),
        }));
        let runner = executor(Ok("t".to_string()), dispatcher);

        let err = runner.run_step(&action(json!({})), &state()).await.unwrap_err();
        assert!(matches!(err, StepError::Transport(_)));
    }

    #[tokio::test]
    async fn slow_worker_times_out() {
        let dispatcher = Arc::new(RecordingDispatcher {
            reply: Ok(TaskResponse::ok(&json!(1))),
            delay: Duration::from_secs(5),
            requests: Mutex::new(Vec::new()),
        });
        let runner = executor(Ok("t".to_string()), dispatcher);

        let err = runner.run_step(&action(json!({})), &state()).await.unwrap_err();
        assert_eq!(err, StepError::Timeout);
    }

    #[tokio::test]
    async fn blank_output_is_null_and_garbage_is_invalid() {
        let blank = RecordingDispatcher::replying(Ok(TaskResponse {
            success: true,
            output: String::new(),
            error_message: String::new(),
        }));
        let output = executor(Ok("t".to_string()), blank)
            .run_step(&action(json!({})), &state())
            .await
            .expect("step");
        assert_eq!(output, JsonValue::Null);

        let garbage = RecordingDispatcher::replying(Ok(TaskResponse {
            success: true,
            output: "{not json".to_string(),
            error_message: String::new(),
        }));
        let err = executor(Ok("t".to_string()), garbage)
            .run_step(&action(json!({})), &state())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn map_transformer_outputs_resolved_config() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("t".to_string()), dispatcher.clone());
        let node = Node::new("shape", WorkflowId::new(), NodeKind::Transformer, "core", "map")
            .with_config(json!({"sender": "{{ trigger.email_from }}"}));

        let output = runner.run_step(&node, &state()).await.expect("step");
        assert_eq!(output, json!({"sender": "alice@example.com"}));
        assert!(dispatcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delay_transformer() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("t".to_string()), dispatcher);

        let quick = Node::new("wait", WorkflowId::new(), NodeKind::Transformer, "core", "delay")
            .with_config(json!({"seconds": 0.01}));
        assert_eq!(
            runner.run_step(&quick, &state()).await.expect("step"),
            json!({"status": "delayed"})
        );

        let too_long = quick.clone().with_config(json!({"seconds": 60}));
        assert_eq!(
            runner.run_step(&too_long, &state()).await.unwrap_err(),
            StepError::Timeout
        );

        let invalid = quick.with_config(json!({"seconds": "soon"}));
        assert!(matches!(
            runner.run_step(&invalid, &state()).await.unwrap_err(),
            StepError::InvalidConfig { .. }
        ));
    }

    #[tokio::test]
    async fn delay_beyond_duration_range_is_invalid_config() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("t".to_string()), dispatcher);
        let node = Node::new("wait", WorkflowId::new(), NodeKind::Transformer, "core", "delay")
            .with_config(json!({"seconds": 1e20}));

        let err = runner.run_step(&node, &state()).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_transformer_task_fails() {
        let dispatcher = RecordingDispatcher::replying(Ok(TaskResponse::ok(&json!(1))));
        let runner = executor(Ok("t".to_string()), dispatcher);
        let node = Node::new("x", WorkflowId::new(), NodeKind::Transformer, "core", "explode");

        let err = runner.run_step(&node, &state()).await.unwrap_err();
        assert!(matches!(err, StepError::UnsupportedTask { .. }));
    }
}

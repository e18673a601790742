//! Error types for the workflow crate.
//!
//! - `GraphError`: Graph construction and ordering failures
//! - `TemplateError`: Configuration templating failures
//! - `TransportError`: RPC transport failures (task dispatch, trigger calls)
//! - `StepError`: One node's execution failure
//! - `ExecutionError`: The run-level taxonomy reported for a failed run

use crate::node::NodeId;
use conduit_core::StoreError;
use conduit_integration::CredentialError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge references a node that is not part of the workflow.
    UnknownNode { node_id: NodeId },
    /// Two nodes share the same id.
    DuplicateNode { node_id: NodeId },
    /// The workflow has no listener node.
    NoListener,
    /// The workflow has more than one listener node.
    MultipleListeners { node_ids: Vec<NodeId> },
    /// The node a run was triggered from is not the workflow's listener.
    NotAListener { node_id: NodeId },
    /// Graph contains cycles.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { node_id } => write!(f, "edge references unknown node: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::NoListener => write!(f, "workflow has no listener node"),
            Self::MultipleListeners { node_ids } => {
                let ids: Vec<&str> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "workflow has multiple listener nodes: {}", ids.join(", "))
            }
            Self::NotAListener { node_id } => write!(f, "node {node_id} is not a listener"),
            Self::CycleDetected => write!(f, "graph contains cycles"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from resolving `{{ ... }}` placeholders in a node's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The reference names a key, field or index absent from state.
    UnresolvedVariable { reference: String },
    /// A placeholder is unterminated or empty.
    MalformedTemplate { template: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedVariable { reference } => {
                write!(f, "unresolved variable: {reference}")
            }
            Self::MalformedTemplate { template } => write!(f, "malformed template: {template}"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Errors from the request/reply transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not connect to the broker.
    ConnectionFailed { message: String },
    /// The request could not be delivered or had no responder.
    RequestFailed { message: String },
    /// No reply arrived within the time budget.
    Timeout,
    /// The request could not be serialized.
    Encode { message: String },
    /// The reply could not be deserialized.
    Decode { message: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "connection failed: {message}"),
            Self::RequestFailed { message } => write!(f, "request failed: {message}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Encode { message } => write!(f, "failed to encode request: {message}"),
            Self::Decode { message } => write!(f, "failed to decode reply: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// No valid access token could be obtained.
    Credential(CredentialError),
    /// The node's configuration could not be resolved.
    Template(TemplateError),
    /// The task worker could not be reached.
    Transport(TransportError),
    /// The task worker reported failure.
    Rejected { message: String },
    /// The task worker's output is not valid JSON.
    InvalidOutput { reason: String },
    /// The node's resolved configuration is unusable for its task.
    InvalidConfig { reason: String },
    /// No handler exists for this kind/task combination.
    UnsupportedTask { kind: String, task: String },
    /// The step exceeded its time budget.
    Timeout,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential(e) => write!(f, "credential error: {e}"),
            Self::Template(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "task dispatch failed: {e}"),
            Self::Rejected { message } => write!(f, "task worker reported failure: {message}"),
            Self::InvalidOutput { reason } => write!(f, "invalid task output: {reason}"),
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
            Self::UnsupportedTask { kind, task } => {
                write!(f, "unsupported {kind} task: {task}")
            }
            Self::Timeout => write!(f, "step timed out"),
        }
    }
}

impl std::error::Error for StepError {}

impl From<TemplateError> for StepError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

impl From<TransportError> for StepError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Stable error classification for a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    GraphCycle,
    NoListener,
    MultipleListeners,
    InvalidPayload,
    UnresolvedVariable,
    InvalidConfig,
    Authentication,
    CredentialRevoked,
    StepExecution,
    NotFound,
    AlreadyExists,
    Storage,
    Timeout,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GraphCycle => "graph_cycle",
            Self::NoListener => "no_listener",
            Self::MultipleListeners => "multiple_listeners",
            Self::InvalidPayload => "invalid_payload",
            Self::UnresolvedVariable => "unresolved_variable",
            Self::InvalidConfig => "invalid_config",
            Self::Authentication => "authentication",
            Self::CredentialRevoked => "credential_revoked",
            Self::StepExecution => "step_execution",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Storage => "storage",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    GraphCycle,
    NoListener,
    MultipleListeners { node_ids: Vec<NodeId> },
    /// The trigger payload is not valid JSON.
    InvalidPayload { reason: String },
    UnresolvedVariable { reference: String },
    InvalidConfig { reason: String },
    /// A credential could not be resolved for a transient reason.
    Authentication { reason: String },
    /// The user must re-authorize the connected account.
    CredentialRevoked { reason: String },
    StepExecution { reason: String },
    NotFound { entity: String, id: String },
    AlreadyExists { entity: String, id: String },
    Storage { reason: String },
    Timeout { what: String },
}

impl ExecutionError {
    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GraphCycle => ErrorKind::GraphCycle,
            Self::NoListener => ErrorKind::NoListener,
            Self::MultipleListeners { .. } => ErrorKind::MultipleListeners,
            Self::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            Self::UnresolvedVariable { .. } => ErrorKind::UnresolvedVariable,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::CredentialRevoked { .. } => ErrorKind::CredentialRevoked,
            Self::StepExecution { .. } => ErrorKind::StepExecution,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphCycle => write!(f, "workflow graph contains a cycle"),
            Self::NoListener => write!(f, "workflow has no listener node"),
            Self::MultipleListeners { node_ids } => {
                let ids: Vec<&str> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "workflow has multiple listener nodes: {}", ids.join(", "))
            }
            Self::InvalidPayload { reason } => write!(f, "invalid trigger payload: {reason}"),
            Self::UnresolvedVariable { reference } => {
                write!(f, "unresolved variable: {reference}")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid node configuration: {reason}"),
            Self::Authentication { reason } => write!(f, "authentication failed: {reason}"),
            Self::CredentialRevoked { reason } => {
                write!(f, "credential revoked, re-authorization required: {reason}")
            }
            Self::StepExecution { reason } => write!(f, "step execution failed: {reason}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::Storage { reason } => write!(f, "storage error: {reason}"),
            Self::Timeout { what } => write!(f, "{what} timed out"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<GraphError> for ExecutionError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::CycleDetected => Self::GraphCycle,
            GraphError::NoListener => Self::NoListener,
            GraphError::MultipleListeners { node_ids } => Self::MultipleListeners { node_ids },
            GraphError::UnknownNode { node_id } | GraphError::NotAListener { node_id } => {
                Self::NotFound {
                    entity: "listener node".to_string(),
                    id: node_id.to_string(),
                }
            }
            GraphError::DuplicateNode { node_id } => Self::AlreadyExists {
                entity: "node".to_string(),
                id: node_id.to_string(),
            },
        }
    }
}

impl From<StoreError> for ExecutionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity: entity.to_string(),
                id,
            },
            StoreError::AlreadyExists { entity, id } => Self::AlreadyExists {
                entity: entity.to_string(),
                id,
            },
            StoreError::Backend { reason } => Self::Storage { reason },
        }
    }
}

impl From<StepError> for ExecutionError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Credential(e) if e.requires_reauthorization() => Self::CredentialRevoked {
                reason: e.to_string(),
            },
            StepError::Credential(e) => Self::Authentication {
                reason: e.to_string(),
            },
            StepError::Template(TemplateError::UnresolvedVariable { reference }) => {
                Self::UnresolvedVariable { reference }
            }
            StepError::Template(e @ TemplateError::MalformedTemplate { .. }) => {
                Self::InvalidConfig {
                    reason: e.to_string(),
                }
            }
            StepError::InvalidConfig { reason } => Self::InvalidConfig { reason },
            StepError::Timeout | StepError::Transport(TransportError::Timeout) => Self::Timeout {
                what: "step".to_string(),
            },
            other => Self::StepExecution {
                reason: other.to_string(),
            },
        }
    }
}

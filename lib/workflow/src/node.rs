//! Workflow node types.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - An id, stable across executions and used as its execution-state key
//! - A kind (listener, action, transformer)
//! - A service and task selector naming the worker that performs it
//! - An opaque JSON configuration, templated against execution state
//! - An optional credential reference

use conduit_core::{CredentialId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identifier of a node within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Trigger condition watched by the poller; never executed as a step.
    Listener,
    /// Side-effecting call to a third-party service through a task worker.
    Action,
    /// In-process data manipulation.
    Transformer,
    /// A kind this engine does not know; skipped with a warning.
    #[serde(other)]
    Unrecognized,
}

impl NodeKind {
    /// Parses a stored kind string, mapping unknown values to `Unrecognized`.
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind {
            "listener" => Self::Listener,
            "action" => Self::Action,
            "transformer" => Self::Transformer,
            _ => Self::Unrecognized,
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Action => "action",
            Self::Transformer => "transformer",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub workflow_id: WorkflowId,
    pub kind: NodeKind,
    /// Service selector, e.g. "gmail".
    pub service: String,
    /// Task selector, e.g. "send_email".
    pub task: String,
    /// Raw configuration; may contain `{{ ... }}` placeholders.
    #[serde(default)]
    pub config: JsonValue,
    #[serde(default)]
    pub credential_id: Option<CredentialId>,
    /// UI-only layout data, ignored by the engine.
    #[serde(default)]
    pub position: Option<JsonValue>,
}

impl Node {
    /// Creates a node with an empty object configuration.
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        workflow_id: WorkflowId,
        kind: NodeKind,
        service: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id,
            kind,
            service: service.into(),
            task: task.into(),
            config: JsonValue::Object(serde_json::Map::new()),
            credential_id: None,
            position: None,
        }
    }

    /// Sets the raw configuration.
    #[must_use]
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn with_credential(mut self, credential_id: CredentialId) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    /// Returns true if this node is a listener.
    #[must_use]
    pub fn is_listener(&self) -> bool {
        self.kind == NodeKind::Listener
    }
}

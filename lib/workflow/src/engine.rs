//! Workflow execution engine.
//!
//! A run:
//! 1. Resolves the owning workflow from the trigger node
//! 2. Parses the trigger payload and seeds execution state
//! 3. Orders the workflow's nodes once
//! 4. Executes them sequentially, recording each output under its node id
//! 5. Stops at the first failure without compensating earlier side effects
//!
//! Every finished run emits one audit record.

use crate::edge::Edge;
use crate::error::ExecutionError;
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId, NodeKind};
use crate::state::ExecutionState;
use crate::step::StepRunner;
use async_trait::async_trait;
use conduit_core::{StoreError, WorkflowId, WorkflowRunId};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Read access to stored workflow graphs.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Loads a single node by id; used to resolve a trigger's workflow.
    async fn get_node(&self, node_id: &NodeId) -> Result<Node, StoreError>;

    /// Loads every node of a workflow.
    async fn get_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, StoreError>;

    /// Loads every edge of a workflow.
    async fn get_edges(&self, workflow_id: WorkflowId) -> Result<Vec<Edge>, StoreError>;
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// Nodes that executed, in order.
    pub executed: Vec<NodeId>,
    pub state: ExecutionState,
}

/// Result of a failed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub run_id: WorkflowRunId,
    /// Unknown when the trigger node could not be resolved.
    pub workflow_id: Option<WorkflowId>,
    /// The node whose execution failed, if the failure was a step.
    pub node_id: Option<NodeId>,
    pub error: ExecutionError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "run {} failed at node {node_id}: {}", self.run_id, self.error),
            None => write!(f, "run {} failed: {}", self.run_id, self.error),
        }
    }
}

impl std::error::Error for RunFailure {}

/// Drives one run at a time; share it across tasks to run many.
pub struct ExecutionEngine {
    graphs: Arc<dyn GraphSource>,
    steps: Arc<dyn StepRunner>,
    store_timeout: Duration,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(graphs: Arc<dyn GraphSource>, steps: Arc<dyn StepRunner>) -> Self {
        Self {
            graphs,
            steps,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the time budget for each graph read.
    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Runs the workflow owning `trigger_node_id` with a fresh run id.
    pub async fn run(
        &self,
        trigger_node_id: &NodeId,
        payload: &str,
    ) -> Result<RunSummary, RunFailure> {
        self.run_with_id(WorkflowRunId::new(), trigger_node_id, payload)
            .await
    }

    /// Runs the workflow owning `trigger_node_id` under a caller-chosen run id.
    ///
    /// # Errors
    ///
    /// Returns a `RunFailure` naming the failing node (if any) and the error.
    pub async fn run_with_id(
        &self,
        run_id: WorkflowRunId,
        trigger_node_id: &NodeId,
        payload: &str,
    ) -> Result<RunSummary, RunFailure> {
        let result = self.execute(run_id, trigger_node_id, payload).await;
        match &result {
            Ok(summary) => info!(
                run_id = %run_id,
                workflow_id = %summary.workflow_id,
                trigger_node_id = %trigger_node_id,
                nodes_executed = summary.executed.len(),
                "workflow run succeeded"
            ),
            Err(failure) => error!(
                run_id = %run_id,
                workflow_id = %failure.workflow_id.map(|id| id.to_string()).unwrap_or_default(),
                trigger_node_id = %trigger_node_id,
                node_id = failure.node_id.as_ref().map_or("", NodeId::as_str),
                error_kind = %failure.error.kind(),
                error = %failure.error,
                "workflow run failed"
            ),
        }
        result
    }

    async fn execute(
        &self,
        run_id: WorkflowRunId,
        trigger_node_id: &NodeId,
        payload: &str,
    ) -> Result<RunSummary, RunFailure> {
        let fail = |workflow_id: Option<WorkflowId>,
                    node_id: Option<NodeId>,
                    error: ExecutionError| RunFailure {
            run_id,
            workflow_id,
            node_id,
            error,
        };

        let trigger = self
            .read(self.graphs.get_node(trigger_node_id))
            .await
            .map_err(|e| fail(None, None, e))?;
        let workflow_id = trigger.workflow_id;

        let payload: JsonValue = serde_json::from_str(payload).map_err(|e| {
            fail(
                Some(workflow_id),
                None,
                ExecutionError::InvalidPayload {
                    reason: e.to_string(),
                },
            )
        })?;
        let mut state = ExecutionState::new(payload);

        let nodes = self
            .read(self.graphs.get_nodes(workflow_id))
            .await
            .map_err(|e| fail(Some(workflow_id), None, e))?;
        let edges = self
            .read(self.graphs.get_edges(workflow_id))
            .await
            .map_err(|e| fail(Some(workflow_id), None, e))?;

        let graph = WorkflowGraph::from_parts(nodes, edges)
            .map_err(|e| fail(Some(workflow_id), None, e.into()))?;
        let order = graph
            .execution_order(trigger_node_id)
            .map_err(|e| fail(Some(workflow_id), None, e.into()))?;

        let mut executed = Vec::with_capacity(order.len());
        for node_id in order {
            let Some(node) = graph.get_node(&node_id) else {
                continue;
            };

            match node.kind {
                NodeKind::Action | NodeKind::Transformer => {}
                NodeKind::Listener | NodeKind::Unrecognized => {
                    warn!(run_id = %run_id, node_id = %node_id, kind = %node.kind, "skipping node of unsupported kind");
                    continue;
                }
            }

            let output = self
                .steps
                .run_step(node, &state)
                .await
                .map_err(|e| fail(Some(workflow_id), Some(node_id.clone()), e.into()))?;
            state.record(&node_id, output);
            executed.push(node_id);
        }

        Ok(RunSummary {
            run_id,
            workflow_id,
            executed,
            state,
        })
    }

    async fn read<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ExecutionError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| ExecutionError::Timeout {
                what: "graph read".to_string(),
            })?
            .map_err(ExecutionError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StepError};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory graph store for testing.
    #[derive(Default)]
    struct InMemoryGraphs {
        nodes: Mutex<HashMap<WorkflowId, Vec<Node>>>,
        edges: Mutex<HashMap<WorkflowId, Vec<Edge>>>,
    }

    impl InMemoryGraphs {
        fn with(nodes: Vec<Node>, edges: Vec<Edge>) -> Arc<Self> {
            let store = Self::default();
            if let Some(first) = nodes.first() {
                let workflow_id = first.workflow_id;
                store.nodes.lock().unwrap().insert(workflow_id, nodes);
                store.edges.lock().unwrap().insert(workflow_id, edges);
            }
            Arc::new(store)
        }
    }

    #[async_trait]
    impl GraphSource for InMemoryGraphs {
        async fn get_node(&self, node_id: &NodeId) -> Result<Node, StoreError> {
            self.nodes
                .lock()
                .unwrap()
                .values()
                .flatten()
                .find(|n| &n.id == node_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("workflow node", node_id))
        }

        async fn get_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, StoreError> {
            Ok(self
                .nodes
                .lock()
                .unwrap()
                .get(&workflow_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_edges(&self, workflow_id: WorkflowId) -> Result<Vec<Edge>, StoreError> {
            Ok(self
                .edges
                .lock()
                .unwrap()
                .get(&workflow_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    /// Echoes each node's config and the keys it could see.
    #[derive(Default)]
    struct EchoRunner {
        calls: Mutex<Vec<NodeId>>,
        fail_at: Option<NodeId>,
    }

    impl EchoRunner {
        fn failing_at(node_id: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_at: Some(NodeId::from(node_id)),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(ToString::to_string)
                .collect()
        }
    }

    #[async_trait]
    impl StepRunner for EchoRunner {
        async fn run_step(
            &self,
            node: &Node,
            state: &ExecutionState,
        ) -> Result<JsonValue, StepError> {
            self.calls.lock().unwrap().push(node.id.clone());
            if self.fail_at.as_ref() == Some(&node.id) {
                return Err(StepError::Rejected {
                    message: "boom".to_string(),
                });
            }
            let seen: Vec<&str> = state.keys().collect();
            Ok(json!({"config": node.config, "seen": seen}))
        }
    }

    fn chain(kinds: &[(&str, NodeKind)]) -> (Vec<Node>, Vec<Edge>) {
        let workflow_id = WorkflowId::new();
        let nodes: Vec<Node> = kinds
            .iter()
            .map(|(id, kind)| {
                Node::new(*id, workflow_id, *kind, "svc", "task").with_config(json!({"id": id}))
            })
            .collect();
        let edges = nodes
            .windows(2)
            .map(|pair| Edge::between(workflow_id, pair[0].id.clone(), pair[1].id.clone()))
            .collect();
        (nodes, edges)
    }

    fn abc() -> (Vec<Node>, Vec<Edge>) {
        chain(&[
            ("L", NodeKind::Listener),
            ("A", NodeKind::Action),
            ("B", NodeKind::Action),
            ("C", NodeKind::Action),
        ])
    }

    #[tokio::test]
    async fn runs_chain_in_order_and_accumulates_state() {
        let (nodes, edges) = abc();
        let runner = Arc::new(EchoRunner::default());
        let engine = ExecutionEngine::new(InMemoryGraphs::with(nodes, edges), runner.clone());

        let summary = engine
            .run(&NodeId::from("L"), r#"{"x":1}"#)
            .await
            .expect("run");

        assert_eq!(runner.calls(), vec!["A", "B", "C"]);
        assert_eq!(
            summary.state.keys().collect::<Vec<_>>(),
            vec!["trigger", "A", "B", "C"]
        );
        assert_eq!(summary.state.trigger(), &json!({"x": 1}));
        assert_eq!(
            summary.state.output(&NodeId::from("C")),
            Some(&json!({"config": {"id": "C"}, "seen": ["trigger", "A", "B"]}))
        );
        assert_eq!(summary.executed.len(), 3);
    }

    #[tokio::test]
    async fn failure_stops_the_run() {
        let (nodes, edges) = abc();
        let runner = Arc::new(EchoRunner::failing_at("B"));
        let engine = ExecutionEngine::new(InMemoryGraphs::with(nodes, edges), runner.clone());

        let failure = engine
            .run(&NodeId::from("L"), r#"{"x":1}"#)
            .await
            .unwrap_err();

        assert_eq!(runner.calls(), vec!["A", "B"]);
        assert_eq!(failure.node_id, Some(NodeId::from("B")));
        assert_eq!(failure.error.kind(), ErrorKind::StepExecution);
        assert!(failure.workflow_id.is_some());
        assert!(failure.to_string().contains("failed at node B"));
    }

    #[tokio::test]
    async fn malformed_payload_fails_before_any_step() {
        let (nodes, edges) = abc();
        let runner = Arc::new(EchoRunner::default());
        let engine = ExecutionEngine::new(InMemoryGraphs::with(nodes, edges), runner.clone());

        let failure = engine
            .run(&NodeId::from("L"), "{not json")
            .await
            .unwrap_err();

        assert_eq!(failure.error.kind(), ErrorKind::InvalidPayload);
        assert_eq!(failure.node_id, None);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_trigger_node_is_not_found() {
        let (nodes, edges) = abc();
        let engine = ExecutionEngine::new(
            InMemoryGraphs::with(nodes, edges),
            Arc::new(EchoRunner::default()),
        );

        let failure = engine
            .run(&NodeId::from("nope"), "{}")
            .await
            .unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::NotFound);
        assert_eq!(failure.workflow_id, None);
    }

    #[tokio::test]
    async fn cycle_fails_without_running_steps() {
        let (nodes, mut edges) = abc();
        let workflow_id = nodes[0].workflow_id;
        edges.push(Edge::between(workflow_id, "C", "A"));
        let runner = Arc::new(EchoRunner::default());
        let engine = ExecutionEngine::new(InMemoryGraphs::with(nodes, edges), runner.clone());

        let failure = engine.run(&NodeId::from("L"), "{}").await.unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::GraphCycle);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_kinds_are_skipped() {
        let (nodes, edges) = chain(&[
            ("L", NodeKind::Listener),
            ("A", NodeKind::Action),
            ("X", NodeKind::Unrecognized),
            ("T", NodeKind::Transformer),
        ]);
        let runner = Arc::new(EchoRunner::default());
        let engine = ExecutionEngine::new(InMemoryGraphs::with(nodes, edges), runner.clone());

        let summary = engine.run(&NodeId::from("L"), "{}").await.expect("run");
        assert_eq!(runner.calls(), vec!["A", "T"]);
        assert_eq!(
            summary.state.keys().collect::<Vec<_>>(),
            vec!["trigger", "A", "T"]
        );
    }

    #[tokio::test]
    async fn multiple_listeners_are_rejected() {
        let (mut nodes, edges) = abc();
        let workflow_id = nodes[0].workflow_id;
        nodes.push(Node::new("L2", workflow_id, NodeKind::Listener, "svc", "task"));
        let engine = ExecutionEngine::new(
            InMemoryGraphs::with(nodes, edges),
            Arc::new(EchoRunner::default()),
        );

        let failure = engine.run(&NodeId::from("L"), "{}").await.unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::MultipleListeners);
    }
}

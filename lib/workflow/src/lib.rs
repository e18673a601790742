//! Workflow engine for the conduit platform.
//!
//! This crate provides the workflow execution engine, including:
//!
//! - **Graph Model**: Listener, action and transformer nodes joined by edges
//! - **Ordering**: Single-listener validation and topological execution order
//! - **Execution**: Sequential, fail-fast runs over run-scoped state
//! - **Templating**: `{{ namespace.path }}` references into execution state
//! - **Ingress**: A bounded worker pool accepting trigger requests
//! - **Transport**: NATS request/reply for task dispatch and triggers

pub mod edge;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod ingress;
pub mod nats;
pub mod node;
pub mod state;
pub mod step;
pub mod template;

pub use edge::Edge;
pub use engine::{ExecutionEngine, GraphSource, RunFailure, RunSummary};
pub use envelope::Envelope;
pub use error::{ErrorKind, ExecutionError, GraphError, StepError, TemplateError, TransportError};
pub use graph::WorkflowGraph;
pub use ingress::{
    IngressConfig, RunOutcome, RunReport, TriggerAck, TriggerIngress, TriggerRequest, TriggerSink,
};
pub use nats::{NatsTaskDispatcher, NatsTriggerClient};
pub use node::{Node, NodeId, NodeKind};
pub use state::ExecutionState;
pub use step::{StepExecutor, StepRunner, TaskDispatcher, TaskRequest, TaskResponse};
pub use template::resolve_config;

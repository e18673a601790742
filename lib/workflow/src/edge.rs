//! Edge types for workflow graphs.

use crate::node::NodeId;
use conduit_core::WorkflowId;
use serde::{Deserialize, Serialize};

/// A directed dependency `from -> to` between two nodes of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub from: NodeId,
    pub to: NodeId,
}

impl Edge {
    /// Creates an edge whose id is derived from its endpoints.
    #[must_use]
    pub fn between(workflow_id: WorkflowId, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{from}->{to}"),
            workflow_id,
            from,
            to,
        }
    }
}

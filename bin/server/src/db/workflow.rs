//! Read access to workflow graphs.

use super::{parse_id, store_error};
use async_trait::async_trait;
use conduit_core::{StoreError, WorkflowId};
use conduit_workflow::{Edge, GraphSource, Node, NodeId, NodeKind};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

/// Row type for node queries.
#[derive(FromRow)]
struct NodeRow {
    id: String,
    workflow_id: String,
    kind: String,
    service: String,
    task: String,
    config: JsonValue,
    credential_id: Option<String>,
    position: Option<JsonValue>,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, StoreError> {
        let workflow_id = parse_id("workflow_id", &self.workflow_id)?;
        let credential_id = self
            .credential_id
            .as_deref()
            .map(|raw| parse_id("credential_id", raw))
            .transpose()?;

        Ok(Node {
            id: NodeId::from(self.id),
            workflow_id,
            kind: NodeKind::parse(&self.kind),
            service: self.service,
            task: self.task,
            config: self.config,
            credential_id,
            position: self.position,
        })
    }
}

/// Row type for edge queries.
#[derive(FromRow)]
struct EdgeRow {
    id: String,
    workflow_id: String,
    source_node_id: String,
    target_node_id: String,
}

impl EdgeRow {
    fn try_into_edge(self) -> Result<Edge, StoreError> {
        Ok(Edge {
            id: self.id,
            workflow_id: parse_id("workflow_id", &self.workflow_id)?,
            from: NodeId::from(self.source_node_id),
            to: NodeId::from(self.target_node_id),
        })
    }
}

/// Repository for workflow nodes and edges.
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphSource for WorkflowRepository {
    async fn get_node(&self, node_id: &NodeId) -> Result<Node, StoreError> {
        let row: Option<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, kind, service, task, config, credential_id, position
            FROM workflow_nodes
            WHERE id = $1
            "#,
        )
        .bind(node_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.ok_or_else(|| StoreError::not_found("node", node_id))?
            .try_into_node()
    }

    async fn get_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, StoreError> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, kind, service, task, config, credential_id, position
            FROM workflow_nodes
            WHERE workflow_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(NodeRow::try_into_node).collect()
    }

    async fn get_edges(&self, workflow_id: WorkflowId) -> Result<Vec<Edge>, StoreError> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, source_node_id, target_node_id
            FROM workflow_edges
            WHERE workflow_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(EdgeRow::try_into_edge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::CredentialId;
    use serde_json::json;

    fn node_row(kind: &str) -> NodeRow {
        NodeRow {
            id: "send".to_string(),
            workflow_id: WorkflowId::new().to_string(),
            kind: kind.to_string(),
            service: "gmail".to_string(),
            task: "send_email".to_string(),
            config: json!({"to": "{{ trigger.email_from }}"}),
            credential_id: Some(CredentialId::new().to_string()),
            position: None,
        }
    }

    #[test]
    fn node_row_decodes() {
        let node = node_row("action").try_into_node().unwrap();
        assert_eq!(node.id, NodeId::from("send"));
        assert_eq!(node.kind, NodeKind::Action);
        assert!(node.credential_id.is_some());
        assert_eq!(node.config["to"], "{{ trigger.email_from }}");
    }

    #[test]
    fn unknown_kind_decodes_as_unrecognized() {
        let node = node_row("webhook").try_into_node().unwrap();
        assert_eq!(node.kind, NodeKind::Unrecognized);
    }

    #[test]
    fn invalid_credential_reference_is_rejected() {
        let mut row = node_row("action");
        row.credential_id = Some("not-a-ulid".to_string());
        let err = row.try_into_node().unwrap_err();
        assert!(err.to_string().contains("credential_id"));
    }

    #[test]
    fn edge_row_decodes() {
        let workflow_id = WorkflowId::new();
        let edge = EdgeRow {
            id: "listen->send".to_string(),
            workflow_id: workflow_id.to_string(),
            source_node_id: "listen".to_string(),
            target_node_id: "send".to_string(),
        }
        .try_into_edge()
        .unwrap();
        assert_eq!(edge, Edge::between(workflow_id, "listen", "send"));
    }
}

//! Database repository for listener checkpoints.

use super::{parse_id, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::StoreError;
use conduit_scheduler::{CheckpointStore, ListenerJob, TriggerCheckpoint};
use conduit_workflow::NodeId;
use sqlx::{FromRow, PgPool};

/// Row type for the due-listener batch: a listener node joined with its
/// checkpoint, if any.
#[derive(FromRow)]
struct ListenerRow {
    node_id: String,
    credential_id: Option<String>,
    last_check_at: Option<DateTime<Utc>>,
    last_message_id: Option<String>,
}

impl ListenerRow {
    fn try_into_job(self) -> Result<ListenerJob, StoreError> {
        let node_id = NodeId::from(self.node_id);
        let credential_id = self
            .credential_id
            .as_deref()
            .map(|raw| parse_id("credential_id", raw))
            .transpose()?;
        let checkpoint = self.last_check_at.map(|last_check_at| {
            TriggerCheckpoint::new(node_id.clone(), last_check_at, self.last_message_id)
        });

        Ok(ListenerJob {
            node_id,
            credential_id,
            checkpoint,
        })
    }
}

/// Repository for `trigger_states`.
pub struct CheckpointRepository {
    pool: PgPool,
}

impl CheckpointRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for CheckpointRepository {
    async fn due_listeners(
        &self,
        service: &str,
        limit: usize,
    ) -> Result<Vec<ListenerJob>, StoreError> {
        let rows: Vec<ListenerRow> = sqlx::query_as(
            r#"
            SELECT n.id AS node_id, n.credential_id, t.last_check_at, t.last_message_id
            FROM workflow_nodes n
            JOIN workflows w ON w.id = n.workflow_id
            LEFT JOIN trigger_states t ON t.node_id = n.id
            WHERE n.kind = 'listener' AND n.service = $1 AND w.is_active
            ORDER BY t.last_check_at ASC NULLS FIRST, n.id ASC
            LIMIT $2
            "#,
        )
        .bind(service)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(ListenerRow::try_into_job).collect()
    }

    async fn upsert(&self, checkpoint: &TriggerCheckpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trigger_states (node_id, last_check_at, last_message_id, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (node_id) DO UPDATE SET
                last_check_at = EXCLUDED.last_check_at,
                last_message_id = EXCLUDED.last_message_id,
                updated_at = NOW()
            "#,
        )
        .bind(checkpoint.node_id.as_str())
        .bind(checkpoint.last_check_at)
        .bind(&checkpoint.last_message_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::CredentialId;

    #[test]
    fn never_polled_listener_has_no_checkpoint() {
        let job = ListenerRow {
            node_id: "listen".to_string(),
            credential_id: Some(CredentialId::new().to_string()),
            last_check_at: None,
            last_message_id: None,
        }
        .try_into_job()
        .unwrap();

        assert_eq!(job.node_id, NodeId::from("listen"));
        assert!(job.credential_id.is_some());
        assert!(job.checkpoint.is_none());
    }

    #[test]
    fn polled_listener_carries_checkpoint() {
        let checked = Utc::now();
        let job = ListenerRow {
            node_id: "listen".to_string(),
            credential_id: None,
            last_check_at: Some(checked),
            last_message_id: Some("m1".to_string()),
        }
        .try_into_job()
        .unwrap();

        let checkpoint = job.checkpoint.unwrap();
        assert_eq!(checkpoint.last_check_at, checked);
        assert_eq!(checkpoint.last_message_id.as_deref(), Some("m1"));
        assert!(job.credential_id.is_none());
    }
}

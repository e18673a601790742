//! Database repository for OAuth credentials.

use super::{parse_id, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::{CredentialId, StoreError};
use conduit_integration::{Credential, CredentialStore};
use sqlx::{FromRow, PgPool};

/// Row type for credential queries.
#[derive(FromRow)]
struct CredentialRow {
    id: String,
    user_id: String,
    service: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl CredentialRow {
    fn try_into_credential(self) -> Result<Credential, StoreError> {
        Ok(Credential {
            id: parse_id("credential id", &self.id)?,
            user_id: parse_id("user_id", &self.user_id)?,
            service: self.service,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        })
    }
}

/// Repository for credential records.
pub struct CredentialRepository {
    pool: PgPool,
}

impl CredentialRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn load(&self, id: CredentialId) -> Result<Credential, StoreError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, service, access_token, refresh_token, expires_at
            FROM credentials
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.ok_or_else(|| StoreError::not_found("credential", id))?
            .try_into_credential()
    }

    async fn save_refreshed(
        &self,
        credential: &Credential,
        previous_expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Keyed on the expiry we refreshed from, so a refresh persisted by
        // another process in the meantime is never overwritten.
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = $2,
                refresh_token = $3,
                expires_at = $4,
                updated_at = NOW()
            WHERE id = $1 AND expires_at = $5
            "#,
        )
        .bind(credential.id.to_string())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(previous_expiry)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }
}

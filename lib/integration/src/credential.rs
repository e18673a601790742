//! Stored OAuth credentials and the store they live in.
//!
//! Tokens are never written to logs; `Credential`'s `Debug` output redacts
//! both secrets.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conduit_core::{CredentialId, StoreError, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: std::time::Duration = std::time::Duration::from_secs(3600);

/// An OAuth token pair scoped to one user and one third-party service.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Unique identifier.
    pub id: CredentialId,
    /// The user who connected the account.
    pub user_id: UserId,
    /// Service name, e.g. "gmail".
    pub service: String,
    /// Current access token.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true unless the token stays valid for longer than `grace`.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.expires_at <= now + grace
    }

    /// Overwrites the token fields with the result of a refresh.
    ///
    /// The stored refresh token is only replaced when the provider rotated it.
    pub fn apply_refresh(&mut self, token: RefreshedToken, now: DateTime<Utc>) {
        let lifetime = Duration::from_std(token.expires_in)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_TOKEN_LIFETIME.as_secs() as i64));
        self.access_token = token.access_token;
        if let Some(rotated) = token.refresh_token {
            self.refresh_token = Some(rotated);
        }
        self.expires_at = now + lifetime;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("service", &self.service)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Tokens returned by a successful refresh exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: std::time::Duration,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("rotated", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Persistence for credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads a credential by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such credential exists.
    async fn load(&self, id: CredentialId) -> Result<Credential, StoreError>;

    /// Persists refreshed token fields.
    ///
    /// The write only applies if the stored expiry still equals
    /// `previous_expiry`; returns false when another writer got there first.
    async fn save_refreshed(
        &self,
        credential: &Credential,
        previous_expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

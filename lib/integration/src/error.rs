//! Error types for the integration crate.
//!
//! - `CredentialError`: Errors from resolving a usable access token
//! - `RefreshError`: Errors from the identity provider's token endpoint
//! - `EventSourceError`: Errors from third-party event APIs
//! - `ClientSetupError`: Errors constructing long-lived HTTP clients

use conduit_core::{CredentialId, StoreError};
use std::fmt;

/// Errors from the credential lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The credential record does not exist.
    NotFound { id: CredentialId },
    /// The credential is expiring but holds no refresh token.
    MissingRefreshToken { id: CredentialId },
    /// The identity provider rejected the refresh token.
    Revoked { id: CredentialId, reason: String },
    /// The refresh exchange failed for a reason that may clear on retry.
    Transient { id: CredentialId, reason: String },
    /// A store or provider call exceeded its time budget.
    Timeout { id: CredentialId },
    /// The credential store failed.
    Storage { reason: String },
}

impl CredentialError {
    /// Returns true when the user must re-authorize the connection.
    ///
    /// Transient failures and timeouts return false; callers may retry
    /// those later without prompting the user.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::Revoked { .. } | Self::MissingRefreshToken { .. }
        )
    }

    pub(crate) fn from_store(id: CredentialId, err: StoreError) -> Self {
        if err.is_not_found() {
            Self::NotFound { id }
        } else {
            Self::Storage {
                reason: err.to_string(),
            }
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "credential not found: {id}"),
            Self::MissingRefreshToken { id } => {
                write!(f, "credential {id} has expired and has no refresh token")
            }
            Self::Revoked { id, reason } => {
                write!(f, "connection revoked for credential {id}: {reason}")
            }
            Self::Transient { id, reason } => {
                write!(f, "token refresh failed for credential {id}: {reason}")
            }
            Self::Timeout { id } => write!(f, "credential {id} resolution timed out"),
            Self::Storage { reason } => write!(f, "credential storage failed: {reason}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from a refresh-token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The provider answered and refused the grant.
    Rejected { reason: String },
    /// The provider could not be reached or answered unintelligibly.
    Transport { reason: String },
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "refresh rejected: {reason}"),
            Self::Transport { reason } => write!(f, "refresh transport error: {reason}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Errors from a third-party event API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSourceError {
    /// The access token was refused (HTTP 401/403).
    Authentication { reason: String },
    /// The API answered with a non-success status.
    Api { status: u16, reason: String },
    /// The request never produced a response.
    Transport { reason: String },
    /// The response body could not be decoded.
    Decode { reason: String },
}

impl fmt::Display for EventSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication { reason } => write!(f, "authentication failed: {reason}"),
            Self::Api { status, reason } => write!(f, "api error (status {status}): {reason}"),
            Self::Transport { reason } => write!(f, "transport error: {reason}"),
            Self::Decode { reason } => write!(f, "invalid response: {reason}"),
        }
    }
}

impl std::error::Error for EventSourceError {}

/// Errors constructing an HTTP-backed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSetupError {
    /// An endpoint URL failed to parse.
    InvalidUrl { url: String, details: String },
    /// The underlying HTTP client could not be built.
    HttpClient { details: String },
}

impl fmt::Display for ClientSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url, details } => write!(f, "invalid url '{url}': {details}"),
            Self::HttpClient { details } => write!(f, "failed to build http client: {details}"),
        }
    }
}

impl std::error::Error for ClientSetupError {}

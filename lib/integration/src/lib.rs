//! Integration layer for the conduit platform.
//!
//! This crate provides:
//!
//! - **Credentials**: Stored OAuth token pairs and the store trait
//! - **Credential manager**: Serialized refresh of expiring access tokens
//! - **OAuth refresher**: Refresh-token exchange via the `oauth2` crate
//! - **Event sources**: Trigger detection against third-party APIs (Gmail)

pub mod connector;
pub mod credential;
pub mod error;
pub mod gmail;
pub mod manager;
pub mod oauth;

pub use connector::{EventSource, TriggerEvent};
pub use credential::{Credential, CredentialStore, RefreshedToken};
pub use error::{ClientSetupError, CredentialError, EventSourceError, RefreshError};
pub use gmail::{GMAIL_API_BASE_URL, GmailClient};
pub use manager::{AccessTokenSource, CredentialManager, RefreshPolicy, TokenRefresher};
pub use oauth::{GOOGLE_TOKEN_URL, OAuthRefresher};

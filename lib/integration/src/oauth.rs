//! OAuth 2.0 refresh-token exchange against the identity provider.

use crate::credential::{DEFAULT_TOKEN_LIFETIME, RefreshedToken};
use crate::error::{ClientSetupError, RefreshError};
use crate::manager::TokenRefresher;
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken, RequestTokenError,
    TokenResponse, TokenUrl,
};

/// Google OAuth token URL.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

type RefreshClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Refreshes access tokens through a provider's token endpoint.
#[derive(Clone)]
pub struct OAuthRefresher {
    client: RefreshClient,
    http: reqwest::Client,
}

impl OAuthRefresher {
    /// Creates a refresher for the given OAuth client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> conduit_core::Result<Self, ClientSetupError> {
        let token_url = token_url.into();
        let token_uri =
            TokenUrl::new(token_url.clone()).map_err(|e| ClientSetupError::InvalidUrl {
                url: token_url,
                details: e.to_string(),
            })?;

        let client = BasicClient::new(ClientId::new(client_id.into()))
            .set_client_secret(ClientSecret::new(client_secret.into()))
            .set_token_uri(token_uri);

        // Token endpoint responses are never followed across redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| ClientSetupError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self { client, http })
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(body) => RefreshError::Rejected {
                    reason: body.to_string(),
                },
                other => RefreshError::Transport {
                    reason: other.to_string(),
                },
            })?;

        Ok(RefreshedToken {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME),
        })
    }
}

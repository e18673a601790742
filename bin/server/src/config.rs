//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (e.g. `POLLER__INTERVAL_SECONDS=20`).

use conduit_integration::{GMAIL_API_BASE_URL, GOOGLE_TOKEN_URL, RefreshPolicy};
use conduit_scheduler::PollerConfig;
use conduit_workflow::IngressConfig;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from per-component sections.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// NATS server URL for task dispatch and trigger ingress.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Google OAuth client and API endpoints.
    pub google: GoogleConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub poller: PollerSettings,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

/// Google OAuth client registration.
#[derive(Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    GMAIL_API_BASE_URL.to_string()
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Execution engine and trigger ingress settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Whether this process runs workflows and serves trigger ingress.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bound on each step, including its task worker round trip.
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,

    #[serde(default = "default_run_timeout_seconds")]
    pub run_timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_step_timeout_seconds() -> u64 {
    10
}

fn default_run_timeout_seconds() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            step_timeout_seconds: default_step_timeout_seconds(),
            run_timeout_seconds: default_run_timeout_seconds(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    #[must_use]
    pub fn ingress(&self) -> IngressConfig {
        IngressConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            run_timeout: Duration::from_secs(self.run_timeout_seconds),
        }
    }
}

/// Credential refresh settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Tokens expiring within this many seconds are refreshed before use.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,

    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

fn default_grace_seconds() -> u64 {
    300
}

fn default_call_timeout_seconds() -> u64 {
    5
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            call_timeout_seconds: default_call_timeout_seconds(),
        }
    }
}

impl CredentialsConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            grace: Duration::from_secs(self.grace_seconds),
            call_timeout: self.call_timeout(),
        }
    }
}

/// Event poller settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_look_back_seconds")]
    pub look_back_seconds: u64,

    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    /// Send triggers over NATS even when this process runs the engine.
    #[serde(default)]
    pub remote_ingress: bool,
}

fn default_interval_seconds() -> u64 {
    20
}

fn default_batch_size() -> usize {
    10
}

fn default_look_back_seconds() -> u64 {
    120
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_seconds: default_interval_seconds(),
            batch_size: default_batch_size(),
            look_back_seconds: default_look_back_seconds(),
            call_timeout_seconds: default_call_timeout_seconds(),
            remote_ingress: false,
        }
    }
}

impl PollerSettings {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    #[must_use]
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.interval_seconds),
            batch_size: self.batch_size,
            look_back: Duration::from_secs(self.look_back_seconds),
            call_timeout: self.call_timeout(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validate()
    }

    /// Rejects values that deserialize fine but cannot drive a component.
    ///
    /// # Errors
    ///
    /// Returns [`config::ConfigError::Message`] naming the offending key.
    pub fn validate(self) -> Result<Self, config::ConfigError> {
        let zero = |key: &str| {
            config::ConfigError::Message(format!("{key} must be greater than zero"))
        };
        if self.poller.interval_seconds == 0 {
            return Err(zero("poller.interval_seconds"));
        }
        if self.poller.batch_size == 0 {
            return Err(zero("poller.batch_size"));
        }
        Ok(self)
    }
}

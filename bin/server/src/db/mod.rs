//! Database repositories for the conduit server.
//!
//! This module provides the Postgres side of the collaborator traits:
//! - Workflow graphs for the execution engine
//! - OAuth credentials for the credential manager
//! - Listener checkpoints for the event poller

pub mod checkpoint;
pub mod credential;
pub mod workflow;

pub use checkpoint::CheckpointRepository;
pub use credential::CredentialRepository;
pub use workflow::WorkflowRepository;

use conduit_core::StoreError;
use std::str::FromStr;

/// Maps a driver failure onto the store taxonomy.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists {
            entity: "row",
            id: db.constraint().unwrap_or_default().to_string(),
        },
        _ => StoreError::backend(e),
    }
}

/// Parses a stored id column, reporting undecodable values as backend errors.
pub(crate) fn parse_id<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| StoreError::backend(format!("invalid {column} '{raw}': {e}")))
}

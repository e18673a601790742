//! Error handling foundation for the conduit platform.
//!
//! This module provides the `Result` type alias using rootcause together with
//! `StoreError`, the error every persistence collaborator (graph reads,
//! credential records, trigger checkpoints) reports. Each crate defines its
//! own domain-specific error types in its own error module.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Used by long-lived client constructors whose failures are only ever
/// reported, never matched on.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Errors from persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested entity does not exist.
    NotFound { entity: &'static str, id: String },
    /// An entity with the same identity already exists.
    AlreadyExists { entity: &'static str, id: String },
    /// The backing store failed or returned undecodable data.
    Backend { reason: String },
}

impl StoreError {
    /// Builds a `NotFound` error for the given entity.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Builds a `Backend` error from any displayable cause.
    #[must_use]
    pub fn backend(reason: impl fmt::Display) -> Self {
        Self::Backend {
            reason: reason.to_string(),
        }
    }

    /// Returns true if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::Backend { reason } => write!(f, "store backend error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

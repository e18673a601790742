//! Core domain types shared by every conduit crate.
//!
//! This crate provides the strongly-typed identifiers, the collaborator
//! storage error taxonomy and the rootcause `Result` alias used throughout
//! the workflow execution platform.

pub mod error;
pub mod id;

pub use error::{Result, StoreError};
pub use id::{CredentialId, ParseIdError, UserId, WorkflowId, WorkflowRunId};

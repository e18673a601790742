//! conduit server process.
//!
//! This crate wires the workflow engine, trigger ingress and event poller
//! to their Postgres and NATS collaborators.

pub mod config;
pub mod db;

//! treasury-gate: resource-gated treasury disbursement service.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod oracle;
pub mod chain;
pub mod treasury;
pub mod engine;
pub mod context;
pub mod api;

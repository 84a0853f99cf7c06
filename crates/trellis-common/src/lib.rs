//! Trellis Common - Shared types and utilities
//!
//! This crate provides the foundational pieces used by every Trellis component:
//! - Error types (`TrellisError`)
//! - Etag helpers
//! - The timed storage-call wrapper used by the directories
//! - Metric descriptions and recording helpers

pub mod error;
pub mod execution;
pub mod metrics;
pub mod utils;

// Re-exports for convenience
pub use error::TrellisError;
pub use execution::execute;
pub use utils::{new_etag, nil_etag};

/// Default cluster id used when none is configured
pub const DEFAULT_CLUSTER_ID: &str = "default";

/// Default client name reported in storage-call logs
pub const DEFAULT_CLIENT_NAME: &str = "trellis";

/// Default keyspace holding the membership and reminders tables
pub const DEFAULT_KEYSPACE: &str = "trellis";

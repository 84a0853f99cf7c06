//! Storage session capability
//!
//! The directories do not own a connection lifecycle of their own; they are
//! handed an `Arc<dyn StorageSession>` and compose it. A session exposes
//! schema application, statement preparation and the membership and reminder
//! persistence primitives, including the conditional (CAS) writes every
//! optimistic-concurrency guarantee rests on.

pub mod membership;
pub mod reminder;

pub use membership::MembershipPersistence;
pub use reminder::ReminderPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;
use crate::schema::{PreparedStatement, SchemaAsset, Statement};

/// Unified storage session trait
#[async_trait]
pub trait StorageSession: MembershipPersistence + ReminderPersistence + Send + Sync {
    /// Get the storage engine behind this session
    fn storage_mode(&self) -> StorageMode;

    /// Apply a DDL fragment idempotently
    ///
    /// Returns `true` when the object was created, `false` when it already
    /// existed.
    async fn apply_schema(&self, asset: &SchemaAsset) -> anyhow::Result<bool>;

    /// Names of all schema objects applied so far
    async fn schema_objects(&self) -> anyhow::Result<Vec<String>>;

    /// Prepare a statement; fails if the objects it reads do not exist
    async fn prepare(&self, statement: Statement) -> anyhow::Result<PreparedStatement>;

    /// Health check for the storage engine
    async fn health_check(&self) -> anyhow::Result<()>;

    /// Release the session and the underlying engine handle
    ///
    /// Fails with `SessionClosed` when called on a closed session.
    async fn close(&self) -> anyhow::Result<()>;
}

//! Trellis Persistence - Storage session capability and engines
//!
//! This crate provides:
//! - The `StorageSession` capability trait injected into the directories
//! - Row models shared by all storage engines
//! - Embedded schema assets (CQL DDL) and prepared statements
//! - An embedded RocksDB engine and an in-memory engine

pub mod embedded;
pub mod memory;
pub mod model;
pub mod schema;
pub mod session;
pub mod traits;

// Re-export persistence traits
pub use traits::{MembershipPersistence, ReminderPersistence, StorageSession};

// Re-export engines
pub use embedded::RocksDbSession;
pub use memory::MemorySession;

// Re-export session bootstrap
pub use session::{SessionConfig, connect};

// Re-export model and schema types
pub use model::{
    MembershipRow, ReminderKey, ReminderRow, SiloRow, StorageMode, SuspectTimeRow, TableVersion,
};
pub use schema::{
    MEMBERSHIP_SCHEMA, PreparedStatement, REMINDERS_SCHEMA, SchemaAsset, SchemaObject,
    SchemaObjectKind, Statement,
};

//! Trellis Clustering - Cluster membership
//!
//! This crate provides:
//! - The membership domain model (silo addresses, statuses, entries)
//! - `MembershipDirectory`, the versioned membership table of one cluster
//! - `MembershipGatewayListProvider`, which derives the gateway list from it

pub mod gateway;
mod mapping;
pub mod membership;
pub mod model;

pub use gateway::{GatewayListProvider, MembershipGatewayListProvider};
pub use membership::{MembershipDirectory, MembershipTable};
pub use model::{
    MembershipEntry, MembershipTableData, SiloAddress, SiloStatus, SuspectTime, UpdateCondition,
    VersionedEntry,
};

// Re-export the version pair so callers need not depend on the storage crate
pub use trellis_persistence::TableVersion;

//! Membership persistence trait
//!
//! Primitives over the aggregate `membership` row of a cluster.

use async_trait::async_trait;

use crate::model::{MembershipRow, SiloRow, TableVersion};

/// Membership persistence operations
#[async_trait]
pub trait MembershipPersistence: Send + Sync {
    /// Read the whole membership row of a cluster
    async fn membership_find(&self, cluster_id: &str) -> anyhow::Result<Option<MembershipRow>>;

    /// Create an empty membership row unless one exists
    ///
    /// Returns `false` when the row already existed.
    async fn membership_insert_if_not_exists(
        &self,
        cluster_id: &str,
        version: &TableVersion,
    ) -> anyhow::Result<bool>;

    /// Conditionally write one silo and advance the table version
    ///
    /// Applied only if the stored pair equals `expected`; the stored pair
    /// then becomes `next`. Returns whether the condition held. A missing
    /// row never satisfies the condition.
    async fn membership_put_silo_if(
        &self,
        cluster_id: &str,
        silo: &SiloRow,
        expected: &TableVersion,
        next: &TableVersion,
    ) -> anyhow::Result<bool>;

    /// Unconditionally overwrite one silo of an existing row
    ///
    /// The table version is untouched. Returns `false` when the row does not
    /// exist.
    async fn membership_put_silo(&self, cluster_id: &str, silo: &SiloRow) -> anyhow::Result<bool>;

    /// Unconditionally remove silos by key, returning how many were present
    async fn membership_remove_silos(
        &self,
        cluster_id: &str,
        silo_keys: &[String],
    ) -> anyhow::Result<usize>;

    /// Delete the membership row of a cluster
    async fn membership_delete(&self, cluster_id: &str) -> anyhow::Result<bool>;
}

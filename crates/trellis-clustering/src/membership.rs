//! Membership directory
//!
//! Each cluster owns a single versioned row holding every silo entry. Any
//! structural change (insert or update of an entry) is a conditional write
//! keyed on the table-level version pair, so exactly one of several racing
//! writers that read the same version wins. Heartbeats and cleanup of dead
//! entries are unconditional and leave the version untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use trellis_common::metrics::{record_defunct_silos_removed, record_membership_write};
use trellis_common::{TrellisError, execute, new_etag};
use trellis_persistence::{MEMBERSHIP_SCHEMA, MembershipRow, StorageSession, TableVersion};

use crate::mapping::{from_silo_row, to_silo_row};
use crate::model::{
    MembershipEntry, MembershipTableData, SiloAddress, SiloStatus, UpdateCondition,
};

/// Versioned membership table of one cluster
#[async_trait]
pub trait MembershipTable: Send + Sync {
    /// Apply the schema and, when asked, create the version row if absent
    async fn initialize(&self, try_init_table_version: bool) -> anyhow::Result<()>;

    /// Delete the whole membership row of `cluster_id`
    async fn delete_membership_table_entries(&self, cluster_id: &str) -> anyhow::Result<()>;

    /// Remove dead entries whose last heartbeat predates `before`
    async fn cleanup_defunct_silo_entries(&self, before: DateTime<Utc>) -> anyhow::Result<usize>;

    /// Table version plus the entry of one silo, if present
    async fn read_row(&self, address: &SiloAddress) -> anyhow::Result<MembershipTableData>;

    /// Table version plus every entry
    async fn read_all(&self) -> anyhow::Result<MembershipTableData>;

    /// Add a new entry if `table_version` is still current
    async fn insert_row(
        &self,
        entry: &MembershipEntry,
        table_version: &TableVersion,
    ) -> anyhow::Result<bool>;

    /// Replace an existing entry if the table version is still current
    async fn update_row(
        &self,
        entry: &MembershipEntry,
        condition: &UpdateCondition,
    ) -> anyhow::Result<bool>;

    /// Record a heartbeat without bumping the table version
    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> anyhow::Result<()>;
}

/// Membership table backed by a storage session
pub struct MembershipDirectory {
    client_name: String,
    cluster_id: String,
    session: Arc<dyn StorageSession>,
}

impl MembershipDirectory {
    pub fn new(
        client_name: impl Into<String>,
        cluster_id: impl Into<String>,
        session: Arc<dyn StorageSession>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            cluster_id: cluster_id.into(),
            session,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn find_row(&self) -> anyhow::Result<Option<MembershipRow>> {
        execute(
            &self.client_name,
            "read_membership",
            self.session.membership_find(&self.cluster_id),
        )
        .await
    }

    /// Write `entry` with a fresh entry etag if `expected` is still current
    async fn put_entry_if(
        &self,
        action: &'static str,
        entry: &MembershipEntry,
        expected: &TableVersion,
    ) -> anyhow::Result<bool> {
        let silo = to_silo_row(entry, new_etag());
        let next = expected.next();
        let applied = execute(
            &self.client_name,
            action,
            self.session
                .membership_put_silo_if(&self.cluster_id, &silo, expected, &next),
        )
        .await?;

        record_membership_write(action, applied);
        if applied {
            debug!(
                cluster_id = %self.cluster_id,
                silo = %entry.silo_address,
                status = %entry.status,
                version = next.version,
                "Membership entry written"
            );
        } else {
            debug!(
                cluster_id = %self.cluster_id,
                silo = %entry.silo_address,
                expected_version = expected.version,
                "Membership write lost the version check"
            );
        }
        Ok(applied)
    }
}

#[async_trait]
impl MembershipTable for MembershipDirectory {
    async fn initialize(&self, try_init_table_version: bool) -> anyhow::Result<()> {
        for asset in MEMBERSHIP_SCHEMA.iter() {
            execute(
                &self.client_name,
                "apply_membership_schema",
                self.session.apply_schema(asset),
            )
            .await?;
        }

        if !try_init_table_version {
            return Ok(());
        }

        let created = execute(
            &self.client_name,
            "create_membership_version",
            self.session
                .membership_insert_if_not_exists(&self.cluster_id, &TableVersion::initial()),
        )
        .await;
        match created {
            Ok(true) => info!(cluster_id = %self.cluster_id, "Membership table version created"),
            Ok(false) => {
                debug!(cluster_id = %self.cluster_id, "Membership table version already exists")
            }
            Err(e) if TrellisError::is_coercion(&e) => warn!(
                cluster_id = %self.cluster_id,
                error = %e,
                "Ignoring type coercion failure while creating membership table version"
            ),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn delete_membership_table_entries(&self, cluster_id: &str) -> anyhow::Result<()> {
        let deleted = execute(
            &self.client_name,
            "delete_membership",
            self.session.membership_delete(cluster_id),
        )
        .await?;
        info!(cluster_id = %cluster_id, deleted, "Membership table entries deleted");
        Ok(())
    }

    async fn cleanup_defunct_silo_entries(&self, before: DateTime<Utc>) -> anyhow::Result<usize> {
        let Some(row) = self.find_row().await? else {
            return Ok(0);
        };

        let cutoff = before.timestamp_millis();
        let defunct: Vec<String> = row
            .silos
            .values()
            .filter(|silo| silo.status == SiloStatus::Dead.code() && silo.alive_on < cutoff)
            .map(|silo| silo.address.clone())
            .collect();
        if defunct.is_empty() {
            return Ok(0);
        }

        let removed = execute(
            &self.client_name,
            "remove_defunct_silos",
            self.session
                .membership_remove_silos(&self.cluster_id, &defunct),
        )
        .await?;

        record_defunct_silos_removed(&self.cluster_id, removed);
        info!(
            cluster_id = %self.cluster_id,
            removed,
            before = %before,
            "Defunct silo entries removed"
        );
        Ok(removed)
    }

    async fn read_row(&self, address: &SiloAddress) -> anyhow::Result<MembershipTableData> {
        let Some(row) = self.find_row().await? else {
            return Ok(MembershipTableData::empty());
        };
        let Some(silo) = row.silos.get(&address.to_parsable_string()) else {
            return Ok(MembershipTableData::empty());
        };

        Ok(MembershipTableData {
            entries: vec![from_silo_row(silo)?],
            version: row.table_version(),
        })
    }

    async fn read_all(&self) -> anyhow::Result<MembershipTableData> {
        let Some(row) = self.find_row().await? else {
            return Ok(MembershipTableData::empty());
        };

        let entries = row
            .silos
            .values()
            .map(from_silo_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MembershipTableData {
            entries,
            version: row.table_version(),
        })
    }

    async fn insert_row(
        &self,
        entry: &MembershipEntry,
        table_version: &TableVersion,
    ) -> anyhow::Result<bool> {
        let Some(row) = self.find_row().await? else {
            record_membership_write("insert_row", false);
            return Ok(false);
        };
        if row.silos.contains_key(&entry.key()) {
            record_membership_write("insert_row", false);
            debug!(
                cluster_id = %self.cluster_id,
                silo = %entry.silo_address,
                "Membership entry already exists"
            );
            return Ok(false);
        }

        self.put_entry_if("insert_row", entry, table_version)
            .await
    }

    async fn update_row(
        &self,
        entry: &MembershipEntry,
        condition: &UpdateCondition,
    ) -> anyhow::Result<bool> {
        let Some(row) = self.find_row().await? else {
            return Ok(false);
        };
        let Some(current) = row.silos.get(&entry.key()) else {
            return Ok(false);
        };
        if current.etag != condition.entry_etag {
            debug!(
                cluster_id = %self.cluster_id,
                silo = %entry.silo_address,
                "Membership entry etag moved since it was read"
            );
        }

        self.put_entry_if("update_row", entry, &condition.table_version)
            .await
    }

    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> anyhow::Result<()> {
        let Some(row) = self.find_row().await? else {
            return Ok(());
        };
        let Some(current) = row.silos.get(&entry.key()) else {
            return Ok(());
        };

        let mut silo = current.clone();
        silo.alive_on = entry.i_am_alive_time.timestamp_millis();
        execute(
            &self.client_name,
            "update_i_am_alive",
            self.session.membership_put_silo(&self.cluster_id, &silo),
        )
        .await?;
        Ok(())
    }
}

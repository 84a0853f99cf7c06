// In-memory storage engine
// Backs tests and single-process deployments; nothing survives shutdown

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info};
use trellis_common::TrellisError;

use crate::model::{MembershipRow, ReminderKey, ReminderRow, SiloRow, StorageMode, TableVersion};
use crate::schema::{KNOWN_STORES, PreparedStatement, SchemaAsset, Statement};
use crate::traits::{MembershipPersistence, ReminderPersistence, StorageSession};

/// Storage session holding every row in concurrent maps
///
/// Conditional writes hold the shard lock of the row they check, so the
/// compare and the write are atomic with respect to other writers.
/// Reminder writes and hash scans go through `reminder_hashes`, an ordered
/// `(hash, storage key)` index kept in step with `reminders`.
#[derive(Default)]
pub struct MemorySession {
    memberships: DashMap<String, MembershipRow>,
    reminders: DashMap<String, ReminderRow>,
    reminder_hashes: Mutex<BTreeSet<(u64, String)>>,
    schema: DashMap<String, String>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TrellisError::SessionClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipPersistence for MemorySession {
    async fn membership_find(&self, cluster_id: &str) -> anyhow::Result<Option<MembershipRow>> {
        self.ensure_open()?;
        Ok(self.memberships.get(cluster_id).map(|row| row.clone()))
    }

    async fn membership_insert_if_not_exists(
        &self,
        cluster_id: &str,
        version: &TableVersion,
    ) -> anyhow::Result<bool> {
        self.ensure_open()?;
        match self.memberships.entry(cluster_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(MembershipRow::new(cluster_id, version));
                Ok(true)
            }
        }
    }

    async fn membership_put_silo_if(
        &self,
        cluster_id: &str,
        silo: &SiloRow,
        expected: &TableVersion,
        next: &TableVersion,
    ) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let Some(mut row) = self.memberships.get_mut(cluster_id) else {
            return Ok(false);
        };
        if row.version != expected.version || row.etag != expected.etag {
            return Ok(false);
        }

        row.silos.insert(silo.address.clone(), silo.clone());
        row.version = next.version;
        row.etag = next.etag.clone();
        Ok(true)
    }

    async fn membership_put_silo(&self, cluster_id: &str, silo: &SiloRow) -> anyhow::Result<bool> {
        self.ensure_open()?;
        match self.memberships.get_mut(cluster_id) {
            Some(mut row) => {
                row.silos.insert(silo.address.clone(), silo.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn membership_remove_silos(
        &self,
        cluster_id: &str,
        silo_keys: &[String],
    ) -> anyhow::Result<usize> {
        self.ensure_open()?;
        let Some(mut row) = self.memberships.get_mut(cluster_id) else {
            return Ok(0);
        };
        Ok(silo_keys
            .iter()
            .filter(|key| row.silos.remove(key.as_str()).is_some())
            .count())
    }

    async fn membership_delete(&self, cluster_id: &str) -> anyhow::Result<bool> {
        self.ensure_open()?;
        Ok(self.memberships.remove(cluster_id).is_some())
    }
}

#[async_trait]
impl ReminderPersistence for MemorySession {
    async fn reminder_upsert(&self, row: &ReminderRow) -> anyhow::Result<()> {
        self.ensure_open()?;
        let storage_key = row.key().storage_key();

        let mut hashes = self.reminder_hashes.lock();
        if let Some(previous) = self.reminders.insert(storage_key.clone(), row.clone()) {
            hashes.remove(&(previous.hash, storage_key.clone()));
        }
        hashes.insert((row.hash, storage_key));
        Ok(())
    }

    async fn reminder_find(&self, key: &ReminderKey) -> anyhow::Result<Option<ReminderRow>> {
        self.ensure_open()?;
        Ok(self
            .reminders
            .get(&key.storage_key())
            .map(|row| row.clone()))
    }

    async fn reminder_find_by_owner(
        &self,
        owner_type: &[u8],
        owner_id: &[u8],
    ) -> anyhow::Result<Vec<ReminderRow>> {
        self.ensure_open()?;
        let prefix = ReminderKey::owner_prefix(owner_type, owner_id);
        Ok(self
            .reminders
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn reminder_scan_hash(
        &self,
        statement: &PreparedStatement,
        after: Option<u64>,
        end: u64,
    ) -> anyhow::Result<Vec<ReminderRow>> {
        self.ensure_open()?;
        statement.ensure(Statement::ReminderHashRange)?;
        if after.is_some_and(|begin| begin >= end) {
            return Ok(Vec::new());
        }

        // after < end, so after + 1 cannot overflow
        let lower = after.map_or(0, |begin| begin + 1);
        let hashes = self.reminder_hashes.lock();
        let result: Vec<ReminderRow> = hashes
            .range((lower, String::new())..)
            .take_while(|(hash, _)| *hash <= end)
            .filter_map(|(_, storage_key)| {
                self.reminders.get(storage_key).map(|row| row.clone())
            })
            .collect();
        debug!(?after, end, count = result.len(), "Scanned reminders by hash");
        Ok(result)
    }

    async fn reminder_delete_if(&self, key: &ReminderKey, etag: &str) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let mut hashes = self.reminder_hashes.lock();
        match self
            .reminders
            .remove_if(&key.storage_key(), |_, row| row.etag == etag)
        {
            Some((storage_key, row)) => {
                hashes.remove(&(row.hash, storage_key));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reminder_clear(&self) -> anyhow::Result<usize> {
        self.ensure_open()?;
        let mut hashes = self.reminder_hashes.lock();
        let count = self.reminders.len();
        self.reminders.clear();
        hashes.clear();
        Ok(count)
    }
}

#[async_trait]
impl StorageSession for MemorySession {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn apply_schema(&self, asset: &SchemaAsset) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let object = asset.object()?;
        if object.needs_store() && !KNOWN_STORES.contains(&object.name.as_str()) {
            return Err(TrellisError::InvalidSchema(
                asset.name.to_string(),
                format!("no map backs '{}'", object.name),
            )
            .into());
        }

        match self.schema.entry(object.name.clone()) {
            Entry::Occupied(_) => {
                debug!(object = %object.name, "Schema object already exists");
                Ok(false)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(asset.ddl.to_string());
                info!(object = %object.name, asset = asset.name, "Schema object created");
                Ok(true)
            }
        }
    }

    async fn schema_objects(&self) -> anyhow::Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.schema.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn prepare(&self, statement: Statement) -> anyhow::Result<PreparedStatement> {
        let catalog = self.schema_objects().await?;
        statement.prepare_with(&catalog)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TrellisError::SessionClosed.into());
        }
        self.memberships.clear();
        self.reminders.clear();
        self.reminder_hashes.lock().clear();
        self.schema.clear();
        info!("In-memory storage session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::REMINDERS_SCHEMA;
    use std::sync::Arc;

    fn silo(address: &str) -> SiloRow {
        SiloRow {
            address: address.to_string(),
            host: "localhost".to_string(),
            proxy_port: 0,
            fault_zone: 0,
            update_zone: 0,
            role: None,
            status: 3,
            started_on: 0,
            alive_on: 0,
            timestamp: 0,
            suspect_times: Vec::new(),
            etag: "e".to_string(),
            name: String::new(),
        }
    }

    fn reminder(name: &str, hash: u64) -> ReminderRow {
        ReminderRow {
            owner_type: b"grain".to_vec(),
            owner_id: b"id".to_vec(),
            name: name.to_string(),
            hash,
            start_on: 0,
            period: 1,
            etag: "etag".to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_silo_if_rejects_stale_pair() {
        let session = MemorySession::new();
        let initial = TableVersion::initial();

        assert!(
            !session
                .membership_put_silo_if("c", &silo("a"), &initial, &initial.next())
                .await
                .unwrap()
        );

        session
            .membership_insert_if_not_exists("c", &initial)
            .await
            .unwrap();
        let next = initial.next();
        assert!(
            session
                .membership_put_silo_if("c", &silo("a"), &initial, &next)
                .await
                .unwrap()
        );
        assert!(
            !session
                .membership_put_silo_if("c", &silo("b"), &initial, &initial.next())
                .await
                .unwrap()
        );

        let row = session.membership_find("c").await.unwrap().unwrap();
        assert_eq!(row.table_version(), next);
        assert_eq!(row.silos.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_put_silo_if_has_one_winner() {
        let session = Arc::new(MemorySession::new());
        let initial = TableVersion::initial();
        session
            .membership_insert_if_not_exists("c", &initial)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let session = session.clone();
            let initial = initial.clone();
            handles.push(tokio::spawn(async move {
                session
                    .membership_put_silo_if("c", &silo(&format!("s{}", i)), &initial, &initial.next())
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_remove_silos_counts_present_keys() {
        let session = MemorySession::new();
        assert_eq!(
            session
                .membership_remove_silos("c", &["a".to_string()])
                .await
                .unwrap(),
            0
        );

        session
            .membership_insert_if_not_exists("c", &TableVersion::initial())
            .await
            .unwrap();
        session.membership_put_silo("c", &silo("a")).await.unwrap();
        session.membership_put_silo("c", &silo("b")).await.unwrap();

        let removed = session
            .membership_remove_silos("c", &["a".to_string(), "z".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_scan_hash_and_delete_if() {
        let session = MemorySession::new();
        for asset in REMINDERS_SCHEMA.iter() {
            session.apply_schema(asset).await.unwrap();
        }
        let statement = session.prepare(Statement::ReminderHashRange).await.unwrap();

        session.reminder_upsert(&reminder("a", 5)).await.unwrap();
        session.reminder_upsert(&reminder("b", 15)).await.unwrap();

        let rows = session
            .reminder_scan_hash(&statement, Some(5), 15)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");
        assert!(
            session
                .reminder_scan_hash(&statement, Some(15), 5)
                .await
                .unwrap()
                .is_empty()
        );

        let key = reminder("a", 5).key();
        assert!(!session.reminder_delete_if(&key, "other").await.unwrap());
        assert!(session.reminder_delete_if(&key, "etag").await.unwrap());
        assert_eq!(session.reminder_clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_index_follows_rehash_and_delete() {
        let session = MemorySession::new();
        for asset in REMINDERS_SCHEMA.iter() {
            session.apply_schema(asset).await.unwrap();
        }
        let statement = session.prepare(Statement::ReminderHashRange).await.unwrap();

        session.reminder_upsert(&reminder("a", 5)).await.unwrap();
        session.reminder_upsert(&reminder("a", 50)).await.unwrap();
        assert_eq!(session.reminder_hashes.lock().len(), 1);

        assert!(
            session
                .reminder_scan_hash(&statement, None, 10)
                .await
                .unwrap()
                .is_empty()
        );
        let rows = session
            .reminder_scan_hash(&statement, Some(10), u64::MAX)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hash, 50);

        session.reminder_upsert(&reminder("b", u64::MAX)).await.unwrap();
        let rows = session
            .reminder_scan_hash(&statement, Some(50), u64::MAX)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");

        let key = reminder("a", 50).key();
        assert!(session.reminder_delete_if(&key, "etag").await.unwrap());
        assert_eq!(session.reminder_hashes.lock().len(), 1);
        assert!(
            session
                .reminder_scan_hash(&statement, None, 100)
                .await
                .unwrap()
                .is_empty()
        );

        session.reminder_clear().await.unwrap();
        assert!(session.reminder_hashes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let session = MemorySession::new();
        assert_eq!(session.storage_mode(), StorageMode::Memory);
        session.close().await.unwrap();

        let err = session.reminder_clear().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TrellisError>(),
            Some(&TrellisError::SessionClosed)
        );
        assert!(session.health_check().await.is_err());
        assert!(session.close().await.is_err());
    }
}

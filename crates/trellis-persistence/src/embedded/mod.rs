// Embedded storage engine using RocksDB
// Provides a single-node storage session without an external database

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, DB, DBCompressionType, Direction,
    IteratorMode, Options, WriteBatch,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use trellis_common::TrellisError;

use crate::model::{
    MembershipRow, ReminderKey, ReminderRow, SiloRow, StorageMode, TableVersion, decode_row,
    encode_row, parse_hash_index_key,
};
use crate::schema::{
    KNOWN_STORES, MEMBERSHIP_TABLE, PreparedStatement, REMINDERS_HASH_INDEX, REMINDERS_TABLE,
    SchemaAsset, Statement,
};
use crate::traits::{MembershipPersistence, ReminderPersistence, StorageSession};

// Column family names
pub const CF_SCHEMA: &str = "schema";
pub const CF_MEMBERSHIP: &str = MEMBERSHIP_TABLE;
pub const CF_REMINDERS: &str = REMINDERS_TABLE;
pub const CF_REMINDERS_HASH_INDEX: &str = REMINDERS_HASH_INDEX;

const COLUMN_FAMILIES: [&str; 4] = [CF_SCHEMA, CF_MEMBERSHIP, CF_REMINDERS, CF_REMINDERS_HASH_INDEX];

/// Cluster segment of a membership key
///
/// Hex keeps `@` out of the segment, so no cluster id can extend another
/// cluster's prefix.
fn cluster_segment(cluster_id: &str) -> String {
    const_hex::encode(cluster_id.as_bytes())
}

/// Key of the version/etag pair of a cluster
fn meta_key(cluster_id: &str) -> String {
    format!("{}@@meta", cluster_segment(cluster_id))
}

/// Prefix shared by the silo entries of a cluster
fn silo_prefix(cluster_id: &str) -> String {
    format!("{}@@silo@@", cluster_segment(cluster_id))
}

fn silo_key(cluster_id: &str, address: &str) -> String {
    format!("{}{}", silo_prefix(cluster_id), address)
}

/// Wrap a RocksDB failure as a storage error
fn storage_error(action: &str, err: rocksdb::Error) -> anyhow::Error {
    TrellisError::Storage(format!("RocksDB {} error: {}", action, err)).into()
}

/// Embedded storage session using RocksDB
///
/// The membership row of a cluster is spread over one meta key holding the
/// table version and one key per silo, so heartbeats rewrite a single silo
/// key. Conditional writes run under `write_lock` and commit through an
/// atomic `WriteBatch`; reads go through a snapshot.
pub struct RocksDbSession {
    db: RwLock<Option<Arc<DB>>>,
    write_lock: Mutex<()>,
}

impl RocksDbSession {
    /// Open (or create) a RocksDB database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Bloom filter for faster point lookups
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);

        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(DBCompressionType::Lz4);
        cf_opts.set_block_based_table_factory(&block_opts);

        let cfs: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cfs)
            .map_err(|e| storage_error("open", e))?;

        info!(path = %path.as_ref().display(), "RocksDB storage session opened");
        Ok(Self {
            db: RwLock::new(Some(Arc::new(db))),
            write_lock: Mutex::new(()),
        })
    }

    /// Get the database handle, failing once the session is closed
    fn db(&self) -> anyhow::Result<Arc<DB>> {
        self.db
            .read()
            .clone()
            .ok_or_else(|| anyhow::Error::from(TrellisError::SessionClosed))
    }

    /// Get a column family handle
    fn cf<'a>(db: &'a DB, name: &str) -> anyhow::Result<&'a ColumnFamily> {
        db.cf_handle(name).ok_or_else(|| {
            TrellisError::Storage(format!("column family '{}' not found", name)).into()
        })
    }

    fn read_version(db: &DB, cluster_id: &str) -> anyhow::Result<Option<TableVersion>> {
        let cf = Self::cf(db, CF_MEMBERSHIP)?;
        db.get_cf(cf, meta_key(cluster_id))
            .map_err(|e| storage_error("get", e))?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }

    fn read_membership(db: &DB, cluster_id: &str) -> anyhow::Result<Option<MembershipRow>> {
        let cf = Self::cf(db, CF_MEMBERSHIP)?;
        let snapshot = db.snapshot();

        let Some(meta) = snapshot
            .get_cf(cf, meta_key(cluster_id))
            .map_err(|e| storage_error("get", e))?
        else {
            return Ok(None);
        };
        let version: TableVersion = decode_row(&meta)?;
        let mut row = MembershipRow::new(cluster_id, &version);

        let prefix = silo_prefix(cluster_id);
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in snapshot.iterator_cf(cf, mode) {
            let (key, value) = item.map_err(|e| storage_error("iterator", e))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let silo: SiloRow = decode_row(&value)?;
            row.silos.insert(silo.address.clone(), silo);
        }

        Ok(Some(row))
    }

    /// Collect all keys of a column family starting with `prefix`
    fn keys_with_prefix(db: &DB, cf: &ColumnFamily, prefix: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in db.iterator_cf(cf, mode) {
            let (key, _) = item.map_err(|e| storage_error("iterator", e))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

#[async_trait]
impl MembershipPersistence for RocksDbSession {
    async fn membership_find(&self, cluster_id: &str) -> anyhow::Result<Option<MembershipRow>> {
        let db = self.db()?;
        Self::read_membership(&db, cluster_id)
    }

    async fn membership_insert_if_not_exists(
        &self,
        cluster_id: &str,
        version: &TableVersion,
    ) -> anyhow::Result<bool> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        // Decoding the existing pair surfaces a corrupt row as a coercion error
        if Self::read_version(&db, cluster_id)?.is_some() {
            return Ok(false);
        }

        let cf = Self::cf(&db, CF_MEMBERSHIP)?;
        db.put_cf(cf, meta_key(cluster_id), encode_row(version)?)
            .map_err(|e| storage_error("put", e))?;
        Ok(true)
    }

    async fn membership_put_silo_if(
        &self,
        cluster_id: &str,
        silo: &SiloRow,
        expected: &TableVersion,
        next: &TableVersion,
    ) -> anyhow::Result<bool> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        match Self::read_version(&db, cluster_id)? {
            Some(current) if current == *expected => {}
            _ => return Ok(false),
        }

        let cf = Self::cf(&db, CF_MEMBERSHIP)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, silo_key(cluster_id, &silo.address), encode_row(silo)?);
        batch.put_cf(cf, meta_key(cluster_id), encode_row(next)?);
        db.write(batch)
            .map_err(|e| storage_error("write", e))?;
        Ok(true)
    }

    async fn membership_put_silo(&self, cluster_id: &str, silo: &SiloRow) -> anyhow::Result<bool> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        if Self::read_version(&db, cluster_id)?.is_none() {
            return Ok(false);
        }

        let cf = Self::cf(&db, CF_MEMBERSHIP)?;
        db.put_cf(cf, silo_key(cluster_id, &silo.address), encode_row(silo)?)
            .map_err(|e| storage_error("put", e))?;
        Ok(true)
    }

    async fn membership_remove_silos(
        &self,
        cluster_id: &str,
        silo_keys: &[String],
    ) -> anyhow::Result<usize> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let cf = Self::cf(&db, CF_MEMBERSHIP)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for address in silo_keys {
            let key = silo_key(cluster_id, address);
            if db
                .get_cf(cf, &key)
                .map_err(|e| storage_error("get", e))?
                .is_some()
            {
                batch.delete_cf(cf, &key);
                removed += 1;
            }
        }

        if removed > 0 {
            db.write(batch)
                .map_err(|e| storage_error("write", e))?;
        }
        Ok(removed)
    }

    async fn membership_delete(&self, cluster_id: &str) -> anyhow::Result<bool> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let cf = Self::cf(&db, CF_MEMBERSHIP)?;
        let existed = db
            .get_cf(cf, meta_key(cluster_id))
            .map_err(|e| storage_error("get", e))?
            .is_some();

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, meta_key(cluster_id));
        for key in Self::keys_with_prefix(&db, cf, &silo_prefix(cluster_id))? {
            batch.delete_cf(cf, key);
        }
        db.write(batch)
            .map_err(|e| storage_error("write", e))?;
        Ok(existed)
    }
}

#[async_trait]
impl ReminderPersistence for RocksDbSession {
    async fn reminder_upsert(&self, row: &ReminderRow) -> anyhow::Result<()> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let rows = Self::cf(&db, CF_REMINDERS)?;
        let index = Self::cf(&db, CF_REMINDERS_HASH_INDEX)?;
        let storage_key = row.key().storage_key();

        let mut batch = WriteBatch::default();
        if let Some(bytes) = db
            .get_cf(rows, &storage_key)
            .map_err(|e| storage_error("get", e))?
        {
            let previous: ReminderRow = decode_row(&bytes)?;
            if previous.hash != row.hash {
                batch.delete_cf(index, previous.hash_index_key());
            }
        }
        batch.put_cf(rows, &storage_key, encode_row(row)?);
        batch.put_cf(index, row.hash_index_key(), b"");
        db.write(batch)
            .map_err(|e| storage_error("write", e))
    }

    async fn reminder_find(&self, key: &ReminderKey) -> anyhow::Result<Option<ReminderRow>> {
        let db = self.db()?;
        let rows = Self::cf(&db, CF_REMINDERS)?;
        db.get_cf(rows, key.storage_key())
            .map_err(|e| storage_error("get", e))?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }

    async fn reminder_find_by_owner(
        &self,
        owner_type: &[u8],
        owner_id: &[u8],
    ) -> anyhow::Result<Vec<ReminderRow>> {
        let db = self.db()?;
        let rows = Self::cf(&db, CF_REMINDERS)?;
        let prefix = ReminderKey::owner_prefix(owner_type, owner_id);

        let mut result = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in db.iterator_cf(rows, mode) {
            let (key, value) = item.map_err(|e| storage_error("iterator", e))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            result.push(decode_row(&value)?);
        }
        Ok(result)
    }

    async fn reminder_scan_hash(
        &self,
        statement: &PreparedStatement,
        after: Option<u64>,
        end: u64,
    ) -> anyhow::Result<Vec<ReminderRow>> {
        statement.ensure(Statement::ReminderHashRange)?;
        if after.is_some_and(|begin| begin >= end) {
            return Ok(Vec::new());
        }

        let db = self.db()?;
        let rows = Self::cf(&db, CF_REMINDERS)?;
        let index = Self::cf(&db, CF_REMINDERS_HASH_INDEX)?;
        let snapshot = db.snapshot();

        // after < end, so after + 1 cannot overflow
        let start = after.map(|begin| format!("{:016x}", begin + 1));
        let mode = match &start {
            Some(start) => IteratorMode::From(start.as_bytes(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut result = Vec::new();
        for item in snapshot.iterator_cf(index, mode) {
            let (raw_key, _) = item.map_err(|e| storage_error("iterator", e))?;
            let index_key =
                std::str::from_utf8(&raw_key).map_err(|e| TrellisError::Coercion(e.to_string()))?;
            let (hash, storage_key) = parse_hash_index_key(index_key)?;
            if hash > end {
                break;
            }
            if let Some(bytes) = snapshot
                .get_cf(rows, storage_key)
                .map_err(|e| storage_error("get", e))?
            {
                result.push(decode_row(&bytes)?);
            }
        }

        debug!(?after, end, count = result.len(), "Scanned reminder hash index");
        Ok(result)
    }

    async fn reminder_delete_if(&self, key: &ReminderKey, etag: &str) -> anyhow::Result<bool> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let rows = Self::cf(&db, CF_REMINDERS)?;
        let index = Self::cf(&db, CF_REMINDERS_HASH_INDEX)?;
        let storage_key = key.storage_key();

        let Some(bytes) = db
            .get_cf(rows, &storage_key)
            .map_err(|e| storage_error("get", e))?
        else {
            return Ok(false);
        };
        let current: ReminderRow = decode_row(&bytes)?;
        if current.etag != etag {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(rows, &storage_key);
        batch.delete_cf(index, current.hash_index_key());
        db.write(batch)
            .map_err(|e| storage_error("write", e))?;
        Ok(true)
    }

    async fn reminder_clear(&self) -> anyhow::Result<usize> {
        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let rows = Self::cf(&db, CF_REMINDERS)?;
        let index = Self::cf(&db, CF_REMINDERS_HASH_INDEX)?;

        let row_keys = Self::keys_with_prefix(&db, rows, "")?;
        let index_keys = Self::keys_with_prefix(&db, index, "")?;

        let mut batch = WriteBatch::default();
        for key in &row_keys {
            batch.delete_cf(rows, key);
        }
        for key in &index_keys {
            batch.delete_cf(index, key);
        }
        db.write(batch)
            .map_err(|e| storage_error("write", e))?;
        Ok(row_keys.len())
    }
}

#[async_trait]
impl StorageSession for RocksDbSession {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Embedded
    }

    async fn apply_schema(&self, asset: &SchemaAsset) -> anyhow::Result<bool> {
        let object = asset.object()?;
        if object.needs_store() && !KNOWN_STORES.contains(&object.name.as_str()) {
            return Err(TrellisError::InvalidSchema(
                asset.name.to_string(),
                format!("no column family backs '{}'", object.name),
            )
            .into());
        }

        let db = self.db()?;
        let _guard = self.write_lock.lock().await;

        let cf = Self::cf(&db, CF_SCHEMA)?;
        if db
            .get_cf(cf, &object.name)
            .map_err(|e| storage_error("get", e))?
            .is_some()
        {
            debug!(object = %object.name, "Schema object already exists");
            return Ok(false);
        }

        db.put_cf(cf, &object.name, asset.ddl)
            .map_err(|e| storage_error("put", e))?;
        info!(object = %object.name, asset = asset.name, "Schema object created");
        Ok(true)
    }

    async fn schema_objects(&self) -> anyhow::Result<Vec<String>> {
        let db = self.db()?;
        let cf = Self::cf(&db, CF_SCHEMA)?;
        Self::keys_with_prefix(&db, cf, "")?
            .into_iter()
            .map(|key| String::from_utf8(key).map_err(|e| TrellisError::Coercion(e.to_string()).into()))
            .collect()
    }

    async fn prepare(&self, statement: Statement) -> anyhow::Result<PreparedStatement> {
        let catalog = self.schema_objects().await?;
        statement.prepare_with(&catalog)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let db = self.db()?;
        for name in COLUMN_FAMILIES {
            Self::cf(&db, name)?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let db = self.db.write().take().ok_or(TrellisError::SessionClosed)?;
        db.flush()
            .map_err(|e| storage_error("flush", e))?;
        info!("RocksDB storage session closed");
        Ok(())
    }
}

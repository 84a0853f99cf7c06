//! Row models for the storage layer
//!
//! These types mirror the storage schema and are decoupled from the domain
//! types exposed by the directories.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trellis_common::{TrellisError, new_etag, nil_etag};

/// Storage engine backing a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Embedded RocksDB, persisted on local disk
    #[default]
    Embedded,
    /// Process-local memory, lost on shutdown
    Memory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Embedded => write!(f, "embedded"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded" => Ok(StorageMode::Embedded),
            "memory" => Ok(StorageMode::Memory),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}

/// Table-level version pair of a membership row
///
/// Every structural write must present the current pair and installs the
/// pair returned by [`TableVersion::next`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableVersion {
    pub version: i64,
    pub etag: String,
}

impl TableVersion {
    pub fn new(version: i64, etag: impl Into<String>) -> Self {
        Self {
            version,
            etag: etag.into(),
        }
    }

    /// Version of a freshly created (or missing) membership row
    pub fn initial() -> Self {
        Self::new(0, nil_etag())
    }

    /// The successor pair: version plus one and a fresh etag
    pub fn next(&self) -> Self {
        Self::new(self.version + 1, new_etag())
    }
}

impl Default for TableVersion {
    fn default() -> Self {
        Self::initial()
    }
}

/// Suspicion vote cast by another silo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectTimeRow {
    pub address: String,
    /// Unix millis
    pub timestamp: i64,
}

/// One entry of the `silos` map (the `silo` composite type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiloRow {
    /// Parsable silo address, also the map key
    pub address: String,
    pub host: String,
    pub proxy_port: i32,
    pub fault_zone: i32,
    pub update_zone: i32,
    #[serde(default)]
    pub role: Option<String>,
    pub status: i32,
    /// Unix millis
    pub started_on: i64,
    /// Unix millis of the last heartbeat
    pub alive_on: i64,
    /// Unix millis of the last structural write
    pub timestamp: i64,
    #[serde(default)]
    pub suspect_times: Vec<SuspectTimeRow>,
    pub etag: String,
    #[serde(default)]
    pub name: String,
}

/// The aggregate membership row of one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub id: String,
    pub version: i64,
    pub etag: String,
    #[serde(default)]
    pub silos: BTreeMap<String, SiloRow>,
}

impl MembershipRow {
    pub fn new(id: impl Into<String>, version: &TableVersion) -> Self {
        Self {
            id: id.into(),
            version: version.version,
            etag: version.etag.clone(),
            silos: BTreeMap::new(),
        }
    }

    pub fn table_version(&self) -> TableVersion {
        TableVersion::new(self.version, self.etag.clone())
    }
}

/// Natural key of a reminder row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderKey {
    pub owner_type: Vec<u8>,
    pub owner_id: Vec<u8>,
    pub name: String,
}

impl ReminderKey {
    pub fn new(owner_type: &[u8], owner_id: &[u8], name: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.to_vec(),
            owner_id: owner_id.to_vec(),
            name: name.into(),
        }
    }

    /// Ordered storage key: `{hex(type)}@@{hex(id)}@@{name}`
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}",
            Self::owner_prefix(&self.owner_type, &self.owner_id),
            self.name
        )
    }

    /// Prefix shared by every reminder of one owner
    pub fn owner_prefix(owner_type: &[u8], owner_id: &[u8]) -> String {
        format!(
            "{}@@{}@@",
            const_hex::encode(owner_type),
            const_hex::encode(owner_id)
        )
    }
}

/// One row of the `reminders` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRow {
    pub owner_type: Vec<u8>,
    pub owner_id: Vec<u8>,
    pub name: String,
    pub hash: u64,
    /// Unix millis
    pub start_on: i64,
    /// 100 ns ticks
    pub period: i64,
    pub etag: String,
}

impl ReminderRow {
    pub fn key(&self) -> ReminderKey {
        ReminderKey::new(&self.owner_type, &self.owner_id, self.name.clone())
    }

    /// Key of this row in the hash index: `{hash:016x}@@{storage key}`
    ///
    /// Fixed-width hex keeps lexicographic order equal to numeric order.
    pub fn hash_index_key(&self) -> String {
        hash_index_key(self.hash, &self.key().storage_key())
    }
}

pub(crate) fn hash_index_key(hash: u64, storage_key: &str) -> String {
    format!("{:016x}@@{}", hash, storage_key)
}

/// Split a hash index key into its hash and the primary storage key
pub(crate) fn parse_hash_index_key(key: &str) -> anyhow::Result<(u64, &str)> {
    let (hash, rest) = key
        .split_once("@@")
        .ok_or_else(|| TrellisError::Coercion(format!("malformed hash index key '{}'", key)))?;
    let hash = u64::from_str_radix(hash, 16)
        .map_err(|e| TrellisError::Coercion(format!("malformed hash '{}': {}", hash, e)))?;
    Ok((hash, rest))
}

pub(crate) fn encode_row<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| TrellisError::Coercion(e.to_string()).into())
}

pub(crate) fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(bytes).map_err(|e| TrellisError::Coercion(e.to_string()).into())
}

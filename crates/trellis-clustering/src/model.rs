//! Membership domain model

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use trellis_common::TrellisError;
use trellis_persistence::TableVersion;

/// Address of one silo incarnation: endpoint plus generation
///
/// The parsable form `host:port@generation` is also the key of the entry in
/// the membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiloAddress {
    pub endpoint: SocketAddr,
    pub generation: i32,
}

impl SiloAddress {
    pub fn new(endpoint: SocketAddr, generation: i32) -> Self {
        Self {
            endpoint,
            generation,
        }
    }

    pub fn to_parsable_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.generation)
    }
}

impl FromStr for SiloAddress {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TrellisError::InvalidSiloAddress(s.to_string());

        let (endpoint, generation) = s.rsplit_once('@').ok_or_else(invalid)?;
        let endpoint = endpoint.parse::<SocketAddr>().map_err(|_| invalid())?;
        let generation = generation.parse::<i32>().map_err(|_| invalid())?;

        Ok(Self::new(endpoint, generation))
    }
}

/// Lifecycle status of a silo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SiloStatus {
    Joining = 2,
    Active = 3,
    ShuttingDown = 4,
    Stopping = 5,
    Dead = 6,
}

impl SiloStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for SiloStatus {
    type Error = TrellisError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            2 => Ok(SiloStatus::Joining),
            3 => Ok(SiloStatus::Active),
            4 => Ok(SiloStatus::ShuttingDown),
            5 => Ok(SiloStatus::Stopping),
            6 => Ok(SiloStatus::Dead),
            _ => Err(TrellisError::UnknownSiloStatus(code)),
        }
    }
}

impl fmt::Display for SiloStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SiloStatus::Joining => "Joining",
            SiloStatus::Active => "Active",
            SiloStatus::ShuttingDown => "ShuttingDown",
            SiloStatus::Stopping => "Stopping",
            SiloStatus::Dead => "Dead",
        };
        f.write_str(name)
    }
}

/// A suspicion vote: who suspected the silo and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectTime {
    pub address: SiloAddress,
    pub timestamp: DateTime<Utc>,
}

/// One silo's entry in the membership table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    pub silo_address: SiloAddress,
    pub status: SiloStatus,
    pub host_name: String,
    /// Gateway port; 0 when the silo does not accept client connections
    pub proxy_port: i32,
    pub fault_zone: i32,
    pub update_zone: i32,
    pub role: Option<String>,
    pub silo_name: String,
    pub start_time: DateTime<Utc>,
    pub i_am_alive_time: DateTime<Utc>,
    pub suspect_times: Vec<SuspectTime>,
}

impl MembershipEntry {
    /// A freshly started silo, alive now
    pub fn new(silo_address: SiloAddress, status: SiloStatus, host_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            silo_address,
            status,
            host_name: host_name.into(),
            proxy_port: 0,
            fault_zone: 0,
            update_zone: 0,
            role: None,
            silo_name: String::new(),
            start_time: now,
            i_am_alive_time: now,
            suspect_times: Vec::new(),
        }
    }

    /// Key of this entry in the membership row
    pub fn key(&self) -> String {
        self.silo_address.to_parsable_string()
    }
}

/// An entry together with its per-entry etag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    pub entry: MembershipEntry,
    pub etag: String,
}

/// Snapshot of (part of) the membership table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTableData {
    pub entries: Vec<VersionedEntry>,
    pub version: TableVersion,
}

impl MembershipTableData {
    /// No entries, version 0 and the initial etag
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            version: TableVersion::initial(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry of a silo
    pub fn get(&self, address: &SiloAddress) -> Option<&VersionedEntry> {
        self.entries
            .iter()
            .find(|e| e.entry.silo_address == *address)
    }
}

impl Default for MembershipTableData {
    fn default() -> Self {
        Self::empty()
    }
}

/// Condition of an entry update
///
/// Only `table_version` is checked by storage. `entry_etag` records the entry
/// version the caller last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCondition {
    pub entry_etag: String,
    pub table_version: TableVersion,
}

impl UpdateCondition {
    pub fn new(entry_etag: impl Into<String>, table_version: TableVersion) -> Self {
        Self {
            entry_etag: entry_etag.into(),
            table_version,
        }
    }
}

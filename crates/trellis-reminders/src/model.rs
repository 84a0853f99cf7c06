//! Reminder domain model

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use trellis_common::TrellisError;
use trellis_persistence::{ReminderKey, ReminderRow};

/// Storage resolution of reminder periods
const NANOS_PER_TICK: u128 = 100;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Identity of the actor owning a reminder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderOwner {
    pub owner_type: Vec<u8>,
    pub owner_id: Vec<u8>,
}

impl ReminderOwner {
    pub fn new(owner_type: impl Into<Vec<u8>>, owner_id: impl Into<Vec<u8>>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Position of the owner on the hash ring
    ///
    /// First eight bytes (big endian) of the MD5 digest over the
    /// length-prefixed type and id. Stable across processes and releases.
    pub fn uniform_hash(&self) -> u64 {
        let mut hasher = Md5::new();
        hasher.update((self.owner_type.len() as u32).to_be_bytes());
        hasher.update(&self.owner_type);
        hasher.update(&self.owner_id);
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    pub(crate) fn key(&self, name: &str) -> ReminderKey {
        ReminderKey::new(&self.owner_type, &self.owner_id, name)
    }
}

impl fmt::Display for ReminderOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            std::str::from_utf8(&self.owner_type),
            std::str::from_utf8(&self.owner_id),
        ) {
            (Ok(owner_type), Ok(owner_id)) => write!(f, "{}/{}", owner_type, owner_id),
            _ => write!(
                f,
                "{}/{}",
                const_hex::encode(&self.owner_type),
                const_hex::encode(&self.owner_id)
            ),
        }
    }
}

/// A durable timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEntry {
    pub owner: ReminderOwner,
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub period: Duration,
    /// Assigned by the directory on every upsert
    pub etag: String,
}

impl ReminderEntry {
    pub fn new(
        owner: ReminderOwner,
        name: impl Into<String>,
        start_at: DateTime<Utc>,
        period: Duration,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            start_at,
            period,
            etag: String::new(),
        }
    }

    /// Stored form of this reminder with the given etag
    pub(crate) fn to_row(&self, etag: String) -> Result<ReminderRow, TrellisError> {
        Ok(ReminderRow {
            owner_type: self.owner.owner_type.clone(),
            owner_id: self.owner.owner_id.clone(),
            name: self.name.clone(),
            hash: self.owner.uniform_hash(),
            start_on: self.start_at.timestamp_millis(),
            period: duration_to_ticks(self.period)?,
            etag,
        })
    }

    pub(crate) fn from_row(row: ReminderRow) -> Result<Self, TrellisError> {
        let start_at = DateTime::from_timestamp_millis(row.start_on).ok_or_else(|| {
            TrellisError::Coercion(format!("start_on out of range: {}", row.start_on))
        })?;
        Ok(Self {
            owner: ReminderOwner::new(row.owner_type, row.owner_id),
            name: row.name,
            start_at,
            period: ticks_to_duration(row.period)?,
            etag: row.etag,
        })
    }
}

fn duration_to_ticks(period: Duration) -> Result<i64, TrellisError> {
    i64::try_from(period.as_nanos() / NANOS_PER_TICK)
        .map_err(|_| TrellisError::Coercion(format!("period too long: {:?}", period)))
}

fn ticks_to_duration(ticks: i64) -> Result<Duration, TrellisError> {
    if ticks < 0 {
        return Err(TrellisError::Coercion(format!("negative period: {}", ticks)));
    }
    let secs = (ticks / TICKS_PER_SECOND) as u64;
    let nanos = ((ticks % TICKS_PER_SECOND) as u32) * NANOS_PER_TICK as u32;
    Ok(Duration::new(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_hash_is_deterministic() {
        let a = ReminderOwner::new("grain", "user-1");
        let b = ReminderOwner::new("grain", "user-1");
        assert_eq!(a.uniform_hash(), b.uniform_hash());
        assert_ne!(
            a.uniform_hash(),
            ReminderOwner::new("grain", "user-2").uniform_hash()
        );
    }

    #[test]
    fn test_uniform_hash_separates_type_and_id() {
        let a = ReminderOwner::new("ab", "c");
        let b = ReminderOwner::new("a", "bc");
        assert_ne!(a.uniform_hash(), b.uniform_hash());
    }

    #[test]
    fn test_owner_display() {
        assert_eq!(ReminderOwner::new("grain", "42").to_string(), "grain/42");
        assert_eq!(
            ReminderOwner::new(vec![0xff], vec![0x00, 0x01]).to_string(),
            "ff/0001"
        );
    }

    #[test]
    fn test_period_ticks() {
        assert_eq!(duration_to_ticks(Duration::from_secs(1)).unwrap(), 10_000_000);
        assert_eq!(duration_to_ticks(Duration::from_nanos(250)).unwrap(), 2);
        assert_eq!(
            ticks_to_duration(15_000_001).unwrap(),
            Duration::new(1, 500_000_100)
        );
        assert!(ticks_to_duration(-1).is_err());
        assert!(duration_to_ticks(Duration::MAX).is_err());
    }

    #[test]
    fn test_entry_row_conversion() {
        let entry = ReminderEntry::new(
            ReminderOwner::new("grain", "7"),
            "daily",
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            Duration::from_secs(86_400),
        );
        let row = entry.to_row("etag-1".to_string()).unwrap();
        assert_eq!(row.hash, entry.owner.uniform_hash());
        assert_eq!(row.period, 864_000_000_000);

        let decoded = ReminderEntry::from_row(row).unwrap();
        assert_eq!(decoded.etag, "etag-1");
        assert_eq!(decoded.start_at, entry.start_at);
        assert_eq!(decoded.period, entry.period);
        assert_eq!(decoded.owner, entry.owner);
    }
}

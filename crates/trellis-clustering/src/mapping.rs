//! Conversion between membership entries and silo rows

use chrono::{DateTime, Utc};
use trellis_common::TrellisError;
use trellis_persistence::{SiloRow, SuspectTimeRow};

use crate::model::{MembershipEntry, SiloAddress, SiloStatus, SuspectTime, VersionedEntry};

fn to_datetime(field: &str, millis: i64) -> Result<DateTime<Utc>, TrellisError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| TrellisError::Coercion(format!("{} out of range: {}", field, millis)))
}

fn to_address(value: &str) -> Result<SiloAddress, TrellisError> {
    value
        .parse()
        .map_err(|e: TrellisError| TrellisError::Coercion(e.to_string()))
}

/// Build the stored form of an entry, stamped with `etag` and the write time
pub(crate) fn to_silo_row(entry: &MembershipEntry, etag: String) -> SiloRow {
    SiloRow {
        address: entry.key(),
        host: entry.host_name.clone(),
        proxy_port: entry.proxy_port,
        fault_zone: entry.fault_zone,
        update_zone: entry.update_zone,
        role: entry.role.clone(),
        status: entry.status.code(),
        started_on: entry.start_time.timestamp_millis(),
        alive_on: entry.i_am_alive_time.timestamp_millis(),
        timestamp: Utc::now().timestamp_millis(),
        suspect_times: entry
            .suspect_times
            .iter()
            .map(|s| SuspectTimeRow {
                address: s.address.to_parsable_string(),
                timestamp: s.timestamp.timestamp_millis(),
            })
            .collect(),
        etag,
        name: entry.silo_name.clone(),
    }
}

/// Decode a stored silo into an entry and its etag
pub(crate) fn from_silo_row(row: &SiloRow) -> Result<VersionedEntry, TrellisError> {
    let status = SiloStatus::try_from(row.status)?;
    let suspect_times = row
        .suspect_times
        .iter()
        .map(|s| {
            Ok(SuspectTime {
                address: to_address(&s.address)?,
                timestamp: to_datetime("suspect time", s.timestamp)?,
            })
        })
        .collect::<Result<Vec<_>, TrellisError>>()?;

    let entry = MembershipEntry {
        silo_address: to_address(&row.address)?,
        status,
        host_name: row.host.clone(),
        proxy_port: row.proxy_port,
        fault_zone: row.fault_zone,
        update_zone: row.update_zone,
        role: row.role.clone(),
        silo_name: row.name.clone(),
        start_time: to_datetime("started_on", row.started_on)?,
        i_am_alive_time: to_datetime("alive_on", row.alive_on)?,
        suspect_times,
    };

    Ok(VersionedEntry {
        entry,
        etag: row.etag.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> MembershipEntry {
        let mut entry = MembershipEntry::new(
            "192.168.1.10:11111@7".parse().unwrap(),
            SiloStatus::Active,
            "node-a",
        );
        entry.proxy_port = 30000;
        entry.fault_zone = 2;
        entry.update_zone = 3;
        entry.role = Some("frontend".to_string());
        entry.silo_name = "silo-a".to_string();
        entry.start_time = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        entry.i_am_alive_time = DateTime::from_timestamp_millis(1_700_000_060_000).unwrap();
        entry.suspect_times.push(SuspectTime {
            address: "192.168.1.11:11111@3".parse().unwrap(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_030_000).unwrap(),
        });
        entry
    }

    #[test]
    fn test_entry_survives_storage_form() {
        let entry = sample_entry();
        let row = to_silo_row(&entry, "etag-1".to_string());
        assert_eq!(row.address, "192.168.1.10:11111@7");
        assert_eq!(row.status, 3);

        let decoded = from_silo_row(&row).unwrap();
        assert_eq!(decoded.entry, entry);
        assert_eq!(decoded.etag, "etag-1");
    }

    #[test]
    fn test_bad_rows_are_coercion_errors() {
        let mut row = to_silo_row(&sample_entry(), "e".to_string());
        row.status = 0;
        assert_eq!(
            from_silo_row(&row).unwrap_err(),
            TrellisError::UnknownSiloStatus(0)
        );

        let mut row = to_silo_row(&sample_entry(), "e".to_string());
        row.address = "not-an-address".to_string();
        assert!(matches!(
            from_silo_row(&row).unwrap_err(),
            TrellisError::Coercion(_)
        ));
    }
}

//! Reminder directory
//!
//! Reminders are keyed by owner and name and tagged with the owner's uniform
//! hash. Upserts are unconditional (last writer wins) and always assign a new
//! etag; removal is conditional on the etag the caller last saw.
//!
//! Upsert does not check etags, so an upsert racing a removal can bring back
//! a reminder the remover believes is gone.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info};
use trellis_common::metrics::{record_reminder_removed, record_reminder_upserted};
use trellis_common::{TrellisError, execute, new_etag};
use trellis_persistence::{
    PreparedStatement, REMINDERS_SCHEMA, ReminderRow, Statement, StorageSession,
};

use crate::model::{ReminderEntry, ReminderOwner};
use crate::range::HashRange;

/// Durable reminder storage
#[async_trait]
pub trait ReminderTable: Send + Sync {
    /// Apply the schema and prepare range reads; safe to call again
    async fn init(&self) -> anyhow::Result<()>;

    /// All reminders of one owner
    async fn read_rows(&self, owner: &ReminderOwner) -> anyhow::Result<Vec<ReminderEntry>>;

    /// Every reminder whose owner hash lies in `(begin, end]`, wrapping
    /// when `begin > end`
    async fn read_rows_in_range(
        &self,
        begin: u64,
        end: u64,
    ) -> anyhow::Result<Vec<ReminderEntry>>;

    async fn read_row(
        &self,
        owner: &ReminderOwner,
        name: &str,
    ) -> anyhow::Result<Option<ReminderEntry>>;

    /// Write the reminder and return its new etag
    async fn upsert_row(&self, entry: &ReminderEntry) -> anyhow::Result<String>;

    /// Delete the reminder if its etag is still `etag`
    async fn remove_row(
        &self,
        owner: &ReminderOwner,
        name: &str,
        etag: &str,
    ) -> anyhow::Result<bool>;

    async fn test_only_clear_table(&self) -> anyhow::Result<()>;
}

/// Reminder table backed by a storage session
pub struct ReminderDirectory {
    client_name: String,
    session: Arc<dyn StorageSession>,
    range_statement: OnceLock<PreparedStatement>,
}

impl ReminderDirectory {
    pub fn new(client_name: impl Into<String>, session: Arc<dyn StorageSession>) -> Self {
        Self {
            client_name: client_name.into(),
            session,
            range_statement: OnceLock::new(),
        }
    }

    fn range_statement(&self) -> Result<&PreparedStatement, TrellisError> {
        self.range_statement
            .get()
            .ok_or(TrellisError::NotInitialized("reminder directory"))
    }

    fn decode_all(rows: Vec<ReminderRow>) -> anyhow::Result<Vec<ReminderEntry>> {
        rows.into_iter()
            .map(|row| ReminderEntry::from_row(row).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl ReminderTable for ReminderDirectory {
    async fn init(&self) -> anyhow::Result<()> {
        for asset in REMINDERS_SCHEMA.iter() {
            execute(
                &self.client_name,
                "apply_reminders_schema",
                self.session.apply_schema(asset),
            )
            .await?;
        }

        if self.range_statement.get().is_none() {
            let prepared = execute(
                &self.client_name,
                "prepare_reminder_range",
                self.session.prepare(Statement::ReminderHashRange),
            )
            .await?;
            let _ = self.range_statement.set(prepared);
        }

        info!(client = %self.client_name, "Reminder directory initialized");
        Ok(())
    }

    async fn read_rows(&self, owner: &ReminderOwner) -> anyhow::Result<Vec<ReminderEntry>> {
        let rows = execute(
            &self.client_name,
            "read_reminders_of_owner",
            self.session
                .reminder_find_by_owner(&owner.owner_type, &owner.owner_id),
        )
        .await?;
        Self::decode_all(rows)
    }

    async fn read_rows_in_range(
        &self,
        begin: u64,
        end: u64,
    ) -> anyhow::Result<Vec<ReminderEntry>> {
        let statement = self.range_statement()?;
        let range = HashRange::new(begin, end);

        let mut rows = Vec::new();
        for (after, upto) in range.segments() {
            let segment = execute(
                &self.client_name,
                "read_reminders_in_range",
                self.session.reminder_scan_hash(statement, after, upto),
            )
            .await?;
            rows.extend(segment);
        }

        debug!(begin, end, count = rows.len(), "Reminders read by hash range");
        Self::decode_all(rows)
    }

    async fn read_row(
        &self,
        owner: &ReminderOwner,
        name: &str,
    ) -> anyhow::Result<Option<ReminderEntry>> {
        let row = execute(
            &self.client_name,
            "read_reminder",
            self.session.reminder_find(&owner.key(name)),
        )
        .await?;
        Ok(row.map(ReminderEntry::from_row).transpose()?)
    }

    async fn upsert_row(&self, entry: &ReminderEntry) -> anyhow::Result<String> {
        let etag = new_etag();
        let row = entry.to_row(etag.clone())?;
        execute(
            &self.client_name,
            "upsert_reminder",
            self.session.reminder_upsert(&row),
        )
        .await?;

        record_reminder_upserted();
        debug!(owner = %entry.owner, name = %entry.name, hash = row.hash, "Reminder upserted");
        Ok(etag)
    }

    async fn remove_row(
        &self,
        owner: &ReminderOwner,
        name: &str,
        etag: &str,
    ) -> anyhow::Result<bool> {
        let removed = execute(
            &self.client_name,
            "remove_reminder",
            self.session.reminder_delete_if(&owner.key(name), etag),
        )
        .await?;

        if removed {
            record_reminder_removed();
        }
        debug!(owner = %owner, name = %name, removed, "Reminder remove attempted");
        Ok(removed)
    }

    async fn test_only_clear_table(&self) -> anyhow::Result<()> {
        let cleared = execute(
            &self.client_name,
            "clear_reminders",
            self.session.reminder_clear(),
        )
        .await?;
        info!(cleared, "Reminder table cleared");
        Ok(())
    }
}

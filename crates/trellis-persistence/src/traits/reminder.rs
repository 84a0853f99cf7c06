//! Reminder persistence trait
//!
//! Primitives over the `reminders` table and its hash index.

use async_trait::async_trait;

use crate::model::{ReminderKey, ReminderRow};
use crate::schema::PreparedStatement;

/// Reminder persistence operations
#[async_trait]
pub trait ReminderPersistence: Send + Sync {
    /// Write or overwrite a reminder row (last writer wins)
    async fn reminder_upsert(&self, row: &ReminderRow) -> anyhow::Result<()>;

    /// Point lookup by natural key
    async fn reminder_find(&self, key: &ReminderKey) -> anyhow::Result<Option<ReminderRow>>;

    /// All reminders of one owner
    async fn reminder_find_by_owner(
        &self,
        owner_type: &[u8],
        owner_id: &[u8],
    ) -> anyhow::Result<Vec<ReminderRow>>;

    /// All reminders whose hash lies in `(after, end]`, or in `[0, end]`
    /// when `after` is `None`
    ///
    /// The range does not wrap: `after >= end` yields nothing. `statement`
    /// must have been prepared for `Statement::ReminderHashRange`.
    async fn reminder_scan_hash(
        &self,
        statement: &PreparedStatement,
        after: Option<u64>,
        end: u64,
    ) -> anyhow::Result<Vec<ReminderRow>>;

    /// Delete a reminder only if its stored etag equals `etag`
    async fn reminder_delete_if(&self, key: &ReminderKey, etag: &str) -> anyhow::Result<bool>;

    /// Delete every reminder, returning how many rows were removed
    async fn reminder_clear(&self) -> anyhow::Result<usize>;
}

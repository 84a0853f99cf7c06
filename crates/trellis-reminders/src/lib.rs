//! Trellis Reminders - Durable timers partitioned by hash range
//!
//! Each reminder belongs to an owner whose uniform hash places it on the
//! consistent-hash ring. A silo asks for the reminders of the range it owns
//! and takes them over when membership changes.

pub mod model;
pub mod range;
pub mod reminders;

pub use model::{ReminderEntry, ReminderOwner};
pub use range::HashRange;
pub use reminders::{ReminderDirectory, ReminderTable};

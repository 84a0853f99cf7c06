//! Trellis - Cluster membership and reminder directories
//!
//! The root crate wires the directories together: it loads configuration,
//! initializes logging, opens the storage session and builds the
//! [`CoordinationContext`] that hands out the membership table, the gateway
//! list provider and the reminder table.
//!
//! A host process installs logging from the loaded settings before starting
//! the context, and keeps the guard alive for as long as it runs:
//!
//! ```no_run
//! use trellis::{CoordinationContext, LoggingConfig, Settings, init_logging};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::load(None)?;
//! let _guard = init_logging(&LoggingConfig::from_settings(&settings.logging))?;
//! let context = CoordinationContext::start(settings).await?;
//! context.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod startup;

pub use context::CoordinationContext;
pub use startup::{LoggingConfig, LoggingGuard, Settings, init_logging};

// Re-export the component crates
pub use trellis_clustering as clustering;
pub use trellis_common as common;
pub use trellis_persistence as persistence;
pub use trellis_reminders as reminders;

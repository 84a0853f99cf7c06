//! File-based logging
//!
//! Events go to the console, to a root rolling file and to one rolling file
//! per component, routed by `tracing` target:
//!
//! | Log File          | Component              | Target Prefixes       |
//! |-------------------|------------------------|-----------------------|
//! | trellis.log       | Root logger (all)      | (all)                 |
//! | membership.log    | Membership and gateways| trellis_clustering    |
//! | reminders.log     | Reminder directory     | trellis_reminders     |
//! | persistence.log   | Storage sessions       | trellis_persistence   |
//!
//! Log files are stored in `~/trellis/logs` unless `logging.log_dir` is set.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};
use trellis_common::TrellisError;

use super::config::LogSettings;

const ROOT_LOG_FILE: &str = "trellis.log";

/// A component log file and the targets routed to it
struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "membership.log",
        targets: &["trellis_clustering"],
    },
    ComponentLogDef {
        file_name: "reminders.log",
        targets: &["trellis_reminders"],
    },
    ComponentLogDef {
        file_name: "persistence.log",
        targets: &["trellis_persistence", "trellis_common::execution"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join("trellis").join("logs")
}

/// Resolved logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Resolve from the `logging` section; an unknown level falls back to info
    pub fn from_settings(settings: &LogSettings) -> Self {
        let level = settings.level.parse().unwrap_or(Level::INFO);
        Self {
            log_dir: settings.log_dir.clone().unwrap_or_else(default_log_dir),
            console_output: settings.console,
            console_level: level,
            file_logging: settings.file,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking writers alive; dropping it flushes buffered output
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level of the console and root file
/// layers. Component files capture everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| TrellisError::Config(format!("failed to initialize logging: {}", e)))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

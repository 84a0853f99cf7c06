//! Configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, `conf/trellis.yml`
//! (optional), an explicit file, then `TRELLIS__*` environment variables
//! using `__` as the section separator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use trellis_common::{DEFAULT_CLIENT_NAME, DEFAULT_CLUSTER_ID, TrellisError};
use trellis_persistence::SessionConfig;
use validator::Validate;

/// Configuration file read when present
pub const DEFAULT_CONFIG_FILE: &str = "conf/trellis.yml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TRELLIS";

fn default_cluster_id() -> String {
    DEFAULT_CLUSTER_ID.to_string()
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

fn default_max_staleness_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

/// Gateway list settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GatewaySettings {
    /// Advertised staleness bound of the gateway list
    #[serde(default = "default_max_staleness_secs")]
    #[validate(range(min = 1, message = "max_staleness_secs must be positive"))]
    pub max_staleness_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_staleness_secs: default_max_staleness_secs(),
        }
    }
}

impl GatewaySettings {
    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs(self.max_staleness_secs)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Directory of the log files (default: `~/trellis/logs`)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub file: bool,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            console: true,
            file: false,
            level: default_level(),
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[serde(default = "default_cluster_id")]
    #[validate(length(min = 1, message = "cluster_id must not be empty"))]
    pub cluster_id: String,
    /// Name reported in storage-call logs
    #[serde(default = "default_client_name")]
    #[validate(length(min = 1, message = "client_name must not be empty"))]
    pub client_name: String,
    #[serde(default)]
    #[validate(nested)]
    pub storage: SessionConfig,
    #[serde(default)]
    #[validate(nested)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub logging: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            client_name: default_client_name(),
            storage: SessionConfig::default(),
            gateway: GatewaySettings::default(),
            logging: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default file, `path` and the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TrellisError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| TrellisError::Config(e.to_string()))?;

        settings.check()?;
        Ok(settings)
    }

    /// Validate the settings, wrapping failures as configuration errors
    pub fn check(&self) -> anyhow::Result<()> {
        self.validate()
            .map_err(|e| TrellisError::Config(e.to_string()).into())
    }

    /// In-memory storage with default names; handy for tests
    pub fn in_memory(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            storage: SessionConfig::memory(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use trellis_persistence::StorageMode;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.cluster_id, DEFAULT_CLUSTER_ID);
        assert_eq!(settings.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(settings.storage.mode, StorageMode::Embedded);
        assert_eq!(settings.gateway.max_staleness(), Duration::from_secs(60));
        assert!(settings.logging.console);
        assert!(settings.check().is_ok());
    }

    #[test]
    fn test_load_explicit_file() {
        let file = write_config(
            "cluster_id: orders\n\
             storage:\n  mode: memory\n  keyspace: orders_ks\n\
             gateway:\n  max_staleness_secs: 5\n",
        );
        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.cluster_id, "orders");
        assert_eq!(settings.storage.mode, StorageMode::Memory);
        assert_eq!(settings.storage.keyspace, "orders_ks");
        assert_eq!(settings.gateway.max_staleness(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config("cluster_id: \"\"\n");
        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::Config(_))
        ));

        let file = write_config("gateway:\n  max_staleness_secs: 0\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = Settings::load(Some(Path::new("/nonexistent/trellis.yml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_in_memory_settings() {
        let settings = Settings::in_memory("c1");
        assert_eq!(settings.cluster_id, "c1");
        assert_eq!(settings.storage.mode, StorageMode::Memory);
    }
}

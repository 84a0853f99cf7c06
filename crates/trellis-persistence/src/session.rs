//! Storage session bootstrap
//!
//! Builds the engine selected by [`SessionConfig`] and hands it out as a
//! shared `Arc<dyn StorageSession>`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use trellis_common::{DEFAULT_KEYSPACE, TrellisError};
use validator::Validate;

use crate::embedded::RocksDbSession;
use crate::memory::MemorySession;
use crate::model::StorageMode;
use crate::traits::StorageSession;

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_keyspace() -> String {
    DEFAULT_KEYSPACE.to_string()
}

/// Storage session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: StorageMode,
    /// Root directory of the embedded engine
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Keyspace holding the membership and reminders tables
    #[serde(default = "default_keyspace")]
    #[validate(length(min = 1, message = "keyspace must not be empty"))]
    pub keyspace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            data_dir: default_data_dir(),
            keyspace: default_keyspace(),
        }
    }
}

impl SessionConfig {
    pub fn memory() -> Self {
        Self {
            mode: StorageMode::Memory,
            ..Default::default()
        }
    }

    pub fn embedded(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: StorageMode::Embedded,
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Directory of the keyspace inside the data dir
    pub fn keyspace_path(&self) -> PathBuf {
        self.data_dir.join(&self.keyspace)
    }
}

/// Open a storage session for `config`
pub async fn connect(config: &SessionConfig) -> anyhow::Result<Arc<dyn StorageSession>> {
    config
        .validate()
        .map_err(|e| TrellisError::Config(e.to_string()))?;

    let session: Arc<dyn StorageSession> = match config.mode {
        StorageMode::Embedded => {
            let path = config.keyspace_path();
            tokio::fs::create_dir_all(&path).await?;
            Arc::new(RocksDbSession::open(&path)?)
        }
        StorageMode::Memory => Arc::new(MemorySession::new()),
    };

    info!(mode = %config.mode, keyspace = %config.keyspace, "Storage session connected");
    Ok(session)
}

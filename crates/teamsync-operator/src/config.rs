//! Operator configuration, loaded from TOML

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use teamsync_schema::{SchemaRegistry, SearchHistoryPolicy};

use crate::{OperatorError, Result};

/// Environment variable overriding `data_dir`
pub const DATA_DIR_ENV: &str = "TEAMSYNC_DATA_DIR";

/// Which storage backend namespaces are opened with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Process-local, lost on exit
    Memory,
    /// One redb file per namespace under `data_dir`
    #[default]
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub search_history: SearchHistoryPolicy,
    /// Reject child records whose team is not stored
    pub strict_references: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".teamsync"),
            backend: Backend::default(),
            search_history: SearchHistoryPolicy::default(),
            strict_references: false,
        }
    }
}

impl OperatorConfig {
    /// Load config from a TOML file
    ///
    /// A missing file yields the defaults; `TEAMSYNC_DATA_DIR` wins over the
    /// file's `data_dir` either way.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                OperatorError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&content).map_err(|e| match e {
                OperatorError::Config(reason) => {
                    OperatorError::Config(format!("{}: {}", path.display(), reason))
                }
                other => other,
            })?
        } else {
            Self::default()
        };

        Ok(config.with_data_dir_override(env::var(DATA_DIR_ENV).ok()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OperatorError::Config(format!("invalid TOML: {}", e)))
    }

    fn with_data_dir_override(mut self, data_dir: Option<String>) -> Self {
        if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    /// Schema registry matching this config's policies
    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry::with_policy(self.search_history)
    }

    /// Path of the redb file backing `namespace`
    pub fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.data_dir.join(format!("{}.redb", namespace))
    }
}

//! Configuration management for dashvars
//!
//! Two kinds of configuration are handled here:
//!
//! 1. **Engine configuration** ([`EngineConfig`]) - reference syntax, result column,
//!    URL parameter names, parallelism and timeouts. Every field has a default, so an
//!    absent file is equivalent to an empty one.
//! 2. **Dashboard files** ([`DashboardFile`]) - TOML descriptions of a dashboard's
//!    variables, cells and canned query results, consumed by the CLI.
//!
//! # Engine config location
//!
//! Resolved in priority order:
//! 1. An explicit path (`--config`)
//! 2. The `DASHVARS_CONFIG` environment variable
//! 3. `~/.dashvars/config.toml` (`%LOCALAPPDATA%\dashvars\config.toml` on Windows)
//! 4. Built-in defaults
//!
//! ```toml
//! reference_prefix = "v."
//! value_column = "_value"
//! vars_param = "vars"
//! lower_param = "lower"
//! upper_param = "upper"
//! default_time_range_lower = "now() - 1h"
//! max_parallel = 16
//! pending_timeout_secs = 30
//! ```

mod dashboard;

pub use dashboard::{DashboardFile, FixtureEntry};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::core::DashvarError;

/// Environment variable overriding the engine config location.
pub const CONFIG_ENV_VAR: &str = "DASHVARS_CONFIG";

/// Tunables for the resolution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix introducing a variable reference in query text.
    pub reference_prefix: String,
    /// Result column holding produced values.
    pub value_column: String,
    /// URL parameter family for variable overrides.
    pub vars_param: String,
    /// URL parameter for the lower time bound.
    pub lower_param: String,
    /// URL parameter for the upper time bound.
    pub upper_param: String,
    /// Lower bound used when the URL carries none.
    pub default_time_range_lower: String,
    /// Maximum concurrent resolutions within one wave.
    pub max_parallel: usize,
    /// Seconds to wait for another caller's in-flight query before re-checking.
    pub pending_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_prefix: constants::DEFAULT_REFERENCE_PREFIX.to_string(),
            value_column: constants::DEFAULT_VALUE_COLUMN.to_string(),
            vars_param: constants::DEFAULT_VARS_PARAM.to_string(),
            lower_param: constants::DEFAULT_LOWER_PARAM.to_string(),
            upper_param: constants::DEFAULT_UPPER_PARAM.to_string(),
            default_time_range_lower: constants::DEFAULT_TIME_RANGE_LOWER.to_string(),
            max_parallel: constants::default_max_parallel(),
            pending_timeout_secs: constants::PENDING_QUERY_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    /// Load the engine configuration following the documented priority order.
    ///
    /// A missing file yields defaults; a malformed one is a
    /// [`DashvarError::ConfigError`].
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var_os(CONFIG_ENV_VAR) {
                Some(value) => Some(PathBuf::from(value)),
                None => Self::default_path().ok(),
            },
        };

        match path {
            Some(path) if path.exists() => Self::load_from(&path).await,
            Some(path) => {
                tracing::debug!("No engine config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;

        let config: Self = toml::from_str(&content).map_err(|e| DashvarError::ConfigError {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("dashvars")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".dashvars")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), DashvarError> {
        if self.reference_prefix.is_empty() {
            return Err(DashvarError::ConfigError {
                message: "reference_prefix must not be empty".to_string(),
            });
        }
        if self.vars_param.is_empty() || self.lower_param == self.upper_param {
            return Err(DashvarError::ConfigError {
                message: "URL parameter names must be non-empty and distinct".to_string(),
            });
        }
        if self.max_parallel == 0 {
            return Err(DashvarError::ConfigError {
                message: "max_parallel must be at least 1".to_string(),
            });
        }
        if self.pending_timeout_secs == 0 {
            return Err(DashvarError::ConfigError {
                message: "pending_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Timeout for joining an in-flight query.
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

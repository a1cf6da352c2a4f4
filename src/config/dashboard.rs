//! Dashboard definition files.
//!
//! ```toml
//! id = "dash1"
//!
//! [[variables]]
//! id = "v1"
//! name = "static"
//! type = "constant"
//! values = ["beans", "defbuck"]
//!
//! [[variables]]
//! id = "v2"
//! name = "dependent"
//! type = "query"
//! query = 'from(bucket: v.static) |> keep(columns: ["container_name"])'
//!
//! [[cells]]
//! id = "cell1"
//! query = 'from(bucket: v.static) |> filter(fn: (r) => r.container_name == v.dependent)'
//!
//! [[fixtures]]
//! matches = 'from(bucket: "defbuck")'
//! values = ["beans", "cool"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::core::{Cell, DashvarError, TimeRange, Variable};

/// A canned query result used by the CLI's fixture-backed executor.
///
/// The first fixture whose `matches` is a substring of the rendered query wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureEntry {
    /// Substring the rendered query must contain.
    pub matches: String,
    /// Values returned in the value column.
    #[serde(default)]
    pub values: Vec<String>,
    /// When set, the execution fails with this message instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A dashboard: its variables, cells and optional canned results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFile {
    /// Dashboard id, also the dashboard context id.
    pub id: String,
    /// Initial time range, overridden by URL parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Variable definitions in display order.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Cells.
    #[serde(default)]
    pub cells: Vec<Cell>,
    /// Canned query results.
    #[serde(default)]
    pub fixtures: Vec<FixtureEntry>,
}

impl DashboardFile {
    /// Parse a dashboard from TOML text. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> Result<Self, DashvarError> {
        let file: Self = toml::from_str(content).map_err(|e| DashvarError::DashboardParseError {
            file: origin.to_string(),
            reason: e.to_string(),
        })?;
        file.validate()?;
        Ok(file)
    }

    /// Read and parse a dashboard file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read dashboard from {}", path.display()))?;
        Ok(Self::parse(&content, &path.display().to_string())?)
    }

    /// Ids and names must be unique.
    pub fn validate(&self) -> Result<(), DashvarError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for variable in &self.variables {
            if !ids.insert(&variable.id) {
                return Err(DashvarError::DuplicateVariable {
                    name: variable.id.to_string(),
                });
            }
            if !names.insert(&variable.name) {
                return Err(DashvarError::DuplicateVariable {
                    name: variable.name.clone(),
                });
            }
        }
        Ok(())
    }
}

//! `dashvars resolve` - mount a dashboard and print what it would render.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::OutputFormat;
use crate::config::{DashboardFile, EngineConfig};
use crate::core::TimeRange;
use crate::resolver::FixtureExecutor;
use crate::session::{CellStatus, DashboardSession, VariableView};

/// Mount a dashboard file against its fixtures.
#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Dashboard file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// URL search string to mount with, e.g. `?vars%5BCSVVariable%5D=c3`
    #[arg(long, default_value = "")]
    pub url: String,

    /// Select a value after mounting (`NAME=VALUE`, repeatable, applied in order)
    #[arg(long = "select", value_name = "NAME=VALUE")]
    pub selections: Vec<String>,

    /// Lower bound of the time range, overriding the URL and the dashboard
    #[arg(long)]
    pub lower: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct CellReport {
    id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    waiting_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CellReport {
    fn new(id: String, status: CellStatus) -> Self {
        match status {
            CellStatus::Ready {
                query,
            } => Self {
                id,
                status: "ready",
                query: Some(query),
                waiting_on: Vec::new(),
                error: None,
            },
            CellStatus::Loading {
                waiting_on,
            } => Self {
                id,
                status: "loading",
                query: None,
                waiting_on,
                error: None,
            },
            CellStatus::Error {
                error,
                ..
            } => Self {
                id,
                status: "error",
                query: None,
                waiting_on: Vec::new(),
                error: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    dashboard: String,
    time_range: TimeRange,
    variables: Vec<VariableView>,
    cells: Vec<CellReport>,
    search: String,
    executions: usize,
}

fn parse_selection(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| anyhow!("Invalid selection '{raw}': expected NAME=VALUE"))
}

impl ResolveCommand {
    /// Run the command.
    pub async fn execute(self, config: EngineConfig) -> Result<()> {
        let file = DashboardFile::load(&self.file).await?;
        let executor = Arc::new(FixtureExecutor::new(file.fixtures.clone(), config.value_column.clone()));
        let session = DashboardSession::from_file(&file, executor, config)?;
        let dash = session.dashboard_context().clone();

        session.mount(&self.url).await?;
        if let Some(lower) = &self.lower {
            session.set_time_range(TimeRange::since(lower.clone())).await?;
        }
        for raw in &self.selections {
            let (name, value) = parse_selection(raw)?;
            session
                .select(&dash, name, value)
                .await
                .with_context(|| format!("Failed to apply selection '{raw}'"))?;
        }

        let mut cells = Vec::new();
        for cell in session.cells().await {
            let status = session.cell_status(&dash, &cell.id).await?;
            cells.push(CellReport::new(cell.id.to_string(), status));
        }

        let output = ResolveOutput {
            dashboard: dash.to_string(),
            time_range: session.time_range().await,
            variables: session.variables_in_scope(&dash).await?,
            cells,
            search: session.search().await,
            executions: session.cache_stats().executions,
        };
        session.unmount().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
            OutputFormat::Text => print_text(&output),
        }
        Ok(())
    }
}

fn print_text(output: &ResolveOutput) {
    println!("{} {}", "Dashboard".bold(), output.dashboard);
    println!("  time range: {}", output.time_range);

    println!("\n{}", "Variables".bold());
    for variable in &output.variables {
        let status = match variable.status {
            "ready" => variable.status.green(),
            "loading" => variable.status.yellow(),
            _ => variable.status.red(),
        };
        let selected = variable.selected.as_deref().unwrap_or("-");
        let marker = if variable.explicit {
            " (explicit)"
        } else {
            ""
        };
        println!("  {} [{}] {status}: {selected}{marker}", variable.name, variable.kind);
        if !variable.values.is_empty() {
            println!("      values: {}", variable.values.join(", "));
        }
        if let Some(error) = &variable.error {
            println!("      {}", error.red());
        }
    }

    println!("\n{}", "Cells".bold());
    for cell in &output.cells {
        match (cell.status, &cell.query, &cell.error) {
            ("ready", Some(query), _) => println!("  {} {}: {query}", "✓".green(), cell.id),
            ("error", _, Some(error)) => println!("  {} {}: {}", "✗".red(), cell.id, error),
            _ => println!("  {} {}: waiting on {}", "…".yellow(), cell.id, cell.waiting_on.join(", ")),
        }
    }

    println!("\n{} {}", "URL".bold(), if output.search.is_empty() { "(none)" } else { output.search.as_str() });
    println!("{} {}", "Executions".bold(), output.executions);
}

//! Command-line interface for dashvars.
//!
//! The CLI drives the engine against a dashboard file whose `[[fixtures]]`
//! stand in for a query backend. It is a debugging and validation aid: the
//! same resolution, caching and URL rules apply as when the engine is embedded.
//!
//! # Commands
//!
//! - `resolve` - mount a dashboard (optionally from a URL search string), apply
//!   selections and print variables, cells and the resulting URL
//! - `graph` - print the variable dependency tree and any cycles
//! - `validate` - check a dashboard for duplicates, cycles and unknown references
//!
//! # Global options
//!
//! - `--verbose` - debug logging
//! - `--quiet` - no logging
//! - `--config <PATH>` - engine config file (also `DASHVARS_CONFIG`)
//!
//! ```bash
//! dashvars resolve dashboard.toml --url '?vars%5BCSVVariable%5D=c3' --select MapVariable=k2
//! dashvars graph dashboard.toml
//! dashvars --verbose validate dashboard.toml --strict
//! ```

mod graph;
mod resolve;
mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{CONFIG_ENV_VAR, EngineConfig};

pub use graph::GraphCommand;
pub use resolve::ResolveCommand;
pub use validate::ValidateCommand;

/// Output format for commands that print results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Settings derived from global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter; `None` disables logging.
    pub log_level: Option<String>,
    /// Engine config path.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Install the tracing subscriber. `RUST_LOG` wins over the flags.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if let Some(level) = &self.log_level {
            EnvFilter::new(level)
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    }

    /// Load the engine config this run should use.
    pub async fn engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::load(self.config_path.as_deref()).await
    }
}

/// Dashboard variable resolution engine.
#[derive(Parser)]
#[command(
    name = "dashvars",
    about = "Resolve, inspect and validate dashboard variables",
    version,
    long_about = "dashvars resolves dashboard variables in dependency order, caches query results \
                  per context and keeps selections in sync with the dashboard URL."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Disable logging
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the engine config file
    #[arg(long, global = true, env = CONFIG_ENV_VAR, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a dashboard, apply selections and print the result
    Resolve(ResolveCommand),
    /// Print the variable dependency graph
    Graph(GraphCommand),
    /// Check a dashboard file for problems
    Validate(ValidateCommand),
}

impl Cli {
    /// Run the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("warn".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Run with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();
        let engine = config.engine_config().await?;

        match self.command {
            Commands::Resolve(cmd) => cmd.execute(engine).await,
            Commands::Graph(cmd) => cmd.execute(engine).await,
            Commands::Validate(cmd) => cmd.execute(engine).await,
        }
    }
}

//! `dashvars validate` - static checks on a dashboard file.
//!
//! Errors (exit code 1):
//! - the file does not parse, or ids/names are duplicated
//! - variables reference each other circularly
//!
//! Warnings (errors with `--strict`):
//! - references to names that are neither variables nor built-ins
//! - constant or map variables offering no values
//! - persisted selections that are not among the offered values

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::{DashboardFile, EngineConfig};
use crate::core::is_builtin;
use crate::graph::{DependencyGraph, ReferenceScanner};
use crate::store::static_values;

/// Check a dashboard file.
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Dashboard file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Default, Serialize)]
struct ValidationResults {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn check(file: &DashboardFile, scanner: &ReferenceScanner) -> ValidationResults {
    let mut results = ValidationResults::default();
    let graph = DependencyGraph::build(&file.variables, scanner);

    for cycle in graph.cycles() {
        results.errors.push(format!("Circular variable reference: {}", cycle.chain));
    }
    for (id, name) in graph.unknown_references() {
        results.warnings.push(format!("Variable '{}' references unknown variable '{name}'", graph.display_name(id)));
    }

    for cell in &file.cells {
        for name in scanner.references(&cell.query) {
            if !is_builtin(name) && !file.variables.iter().any(|v| v.name == name) {
                results.warnings.push(format!("Cell '{}' references unknown variable '{name}'", cell.id));
            }
        }
    }

    for variable in &file.variables {
        let Some(values) = static_values(variable) else {
            continue;
        };
        if values.is_empty() {
            results.warnings.push(format!("Variable '{}' offers no values", variable.name));
        }
        if let Some(selected) = variable.selected.as_ref().and_then(|s| s.first())
            && !values.contains(selected)
        {
            results.warnings.push(format!(
                "Variable '{}' has persisted selection '{selected}' which is not one of its values",
                variable.name
            ));
        }
    }

    results.valid = results.errors.is_empty();
    results
}

impl ValidateCommand {
    /// Run the command.
    pub async fn execute(self, config: EngineConfig) -> Result<()> {
        let file = DashboardFile::load(&self.file).await?;
        let scanner = ReferenceScanner::new(&config.reference_prefix)?;

        let mut results = check(&file, &scanner);
        if self.strict && !results.warnings.is_empty() {
            results.errors.append(&mut results.warnings);
            results.valid = false;
        }

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            OutputFormat::Text => {
                println!("Validating {}...", self.file.display());
                for error in &results.errors {
                    println!("{} {error}", "✗".red());
                }
                for warning in &results.warnings {
                    println!("{} Warning: {warning}", "⚠".yellow());
                }
                if results.valid {
                    println!(
                        "{} Valid dashboard: {} variables, {} cells",
                        "✓".green(),
                        file.variables.len(),
                        file.cells.len()
                    );
                }
            }
        }

        if !results.valid {
            bail!("Validation failed with {} error(s)", results.errors.len());
        }
        Ok(())
    }
}

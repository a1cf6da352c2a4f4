//! `dashvars graph` - print variable dependencies.

use anyhow::{Result, anyhow};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::{DashboardFile, EngineConfig};
use crate::core::VariableId;
use crate::graph::{DependencyGraph, ReferenceScanner};

/// Print the dependency tree of a dashboard's variables.
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Dashboard file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Only show the tree below this variable (by name)
    #[arg(long)]
    pub variable: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct GraphNode {
    name: String,
    kind: &'static str,
    depends_on: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphOutput {
    variables: Vec<GraphNode>,
    order: Vec<String>,
    cycles: Vec<String>,
}

impl GraphCommand {
    /// Run the command.
    pub async fn execute(self, config: EngineConfig) -> Result<()> {
        let file = DashboardFile::load(&self.file).await?;
        let scanner = ReferenceScanner::new(&config.reference_prefix)?;
        let graph = DependencyGraph::build(&file.variables, &scanner);

        let roots: Vec<&VariableId> = match &self.variable {
            Some(name) => {
                let variable = file
                    .variables
                    .iter()
                    .find(|v| v.name == *name)
                    .ok_or_else(|| anyhow!("Unknown variable '{name}'"))?;
                vec![&variable.id]
            }
            None => file
                .variables
                .iter()
                .filter(|v| graph.direct_dependents(&v.id).is_empty())
                .map(|v| &v.id)
                .collect(),
        };

        match self.format {
            OutputFormat::Json => {
                let output = GraphOutput {
                    variables: file
                        .variables
                        .iter()
                        .map(|v| GraphNode {
                            name: v.name.clone(),
                            kind: v.kind.label(),
                            depends_on: graph.direct_upstreams(&v.id).iter().map(|up| graph.display_name(up)).collect(),
                        })
                        .collect(),
                    order: graph
                        .topological_order()
                        .map(|ids| ids.iter().map(|id| graph.display_name(id)).collect())
                        .unwrap_or_default(),
                    cycles: graph.cycles().into_iter().map(|c| c.chain).collect(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!(
                    "{} {} variables, {} references",
                    "Graph".bold(),
                    graph.node_count(),
                    graph.edge_count()
                );
                if let Ok(order) = graph.topological_order() {
                    let names: Vec<String> = order.iter().map(|id| graph.display_name(id)).collect();
                    println!("  order: {}", names.join(" → "));
                }
                for root in roots {
                    print!("{}", graph.to_tree_string(root));
                }
                for cycle in graph.cycles() {
                    println!("{} cycle: {}", "✗".red(), cycle.chain);
                }
            }
        }
        Ok(())
    }
}

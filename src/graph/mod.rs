//! Dependency graph construction for dashboard variables.
//!
//! - [`references`] extracts `v.<name>` tokens from opaque query text and
//!   rewrites them into literals.
//! - [`dependency_graph`] turns those references into a petgraph graph, detects
//!   cycles and plans dependency-ordered resolution waves.

pub mod dependency_graph;
pub mod references;

pub use dependency_graph::{Cycle, DependencyGraph, EvaluationPlan};
pub use references::{ReferenceScanner, string_literal};

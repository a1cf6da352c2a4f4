//! dashvars - dashboard variable resolution engine
//!
//! Dashboards are parameterized by named variables whose values are substituted
//! into cell queries. Variables may themselves be defined by queries that
//! reference other variables, so values must be computed in dependency order,
//! cached, kept consistent across an editor overlay and the dashboard it came
//! from, and mirrored into the dashboard URL so a view can be shared.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   URL search ──▶│       DashboardSession       │──▶ URL search
//!                 │  mount / select / overlays   │
//!                 └──────┬───────────────┬───────┘
//!                        │               │
//!               ┌────────▼───────┐ ┌─────▼──────────┐
//!               │ ContextManager │ │    Resolver    │──▶ QueryExecutor
//!               └────────┬───────┘ └──┬──────────┬──┘
//!                        │            │          │
//!               ┌────────▼────────────▼─┐ ┌──────▼──────┐
//!               │     VariableStore     │ │ QueryCache  │
//!               │ definitions + context │ │ in-flight   │
//!               │        layers         │ │ dedup       │
//!               └───────────────────────┘ └─────────────┘
//! ```
//!
//! # Modules
//!
//! ## Engine
//! - [`store`] - variable definitions and per-context selection layers
//! - [`graph`] - reference extraction, dependency graph, cycle detection, wave planning
//! - [`resolver`] - dependency-ordered resolution, query cache, executor seam
//! - [`context`] - dashboard contexts and cell-editor overlays
//! - [`url`] - URL query-string parsing and serialization
//! - [`session`] - the public facade tying the pieces together
//!
//! ## Supporting
//! - [`core`] - ids, variable/cell/time-range types, errors
//! - [`config`] - engine configuration and dashboard files
//! - [`constants`] - defaults
//! - [`cli`] - the `dashvars` command-line tool
//!
//! # Variable references
//!
//! Query text is opaque. A reference is the configured prefix followed by a
//! name, `v.buckets` by default. `v.timeRangeStart` and `v.timeRangeStop` are
//! built-ins bound to the dashboard time range. Variables are substituted as
//! double-quoted string literals; built-ins are substituted raw.
//!
//! # Dashboard file format
//!
//! ```toml
//! id = "dash1"
//!
//! [[variables]]
//! id = "v1"
//! name = "CSVVariable"
//! type = "constant"
//! values = ["c1", "c2", "c3"]
//!
//! [[variables]]
//! id = "v2"
//! name = "MapVariable"
//! type = "map"
//! map = { k1 = "v1", k2 = "v2" }
//!
//! [[variables]]
//! id = "v3"
//! name = "buckets"
//! type = "query"
//! query = 'buckets() |> filter(fn: (r) => r.name != v.CSVVariable)'
//!
//! [[cells]]
//! id = "cell1"
//! query = 'from(bucket: v.buckets) |> range(start: v.timeRangeStart)'
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod core;
pub mod graph;
pub mod resolver;
pub mod session;
pub mod store;
pub mod url;

// Test utilities (only compiled in test mode or with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

//! Integration tests for dashvars.
//!
//! Each submodule drives a [`DashboardSession`](dashvars::session::DashboardSession)
//! or the `dashvars` binary end to end against scripted query results.

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod dependencies;
mod overlays;
mod selection;
mod url_sync;

//! Test utilities for dashvars
//!
//! Helpers shared by unit and integration tests:
//! - [`init_test_logging`] - one-time tracing setup that plays well with the test harness
//! - [`RecordingExecutor`] - a scripted [`QueryExecutor`](crate::resolver::QueryExecutor)
//!   that records every query it receives
//! - [`fixtures`] - ready-made dashboards
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashvars::config::EngineConfig;
//! use dashvars::session::DashboardSession;
//! use dashvars::test_utils::{RecordingExecutor, fixtures};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let executor = Arc::new(fixtures::docker_responses(RecordingExecutor::new()));
//! let (variables, cells) = fixtures::docker_dashboard();
//! let session = DashboardSession::new("dash", variables, cells, executor.clone(), EngineConfig::default())?;
//! session.mount("").await?;
//! assert_eq!(executor.call_count(), 1);
//! # Ok(())
//! # }
//! ```

mod executor;
pub mod fixtures;

pub use executor::RecordingExecutor;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=resolver=debug,cache=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

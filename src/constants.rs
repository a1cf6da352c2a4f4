//! Global constants used throughout the dashvars codebase.
//!
//! Timeouts, parallelism parameters and the default names used when no
//! configuration file overrides them.

use std::time::Duration;

/// Default variable-substitution prefix in query text (`v.buckets`).
pub const DEFAULT_REFERENCE_PREFIX: &str = "v.";

/// Default result column holding a query variable's values.
pub const DEFAULT_VALUE_COLUMN: &str = "_value";

/// Default URL parameter family for variable overrides (`vars[Name]=value`).
pub const DEFAULT_VARS_PARAM: &str = "vars";

/// Default URL parameter for the time range's lower bound.
pub const DEFAULT_LOWER_PARAM: &str = "lower";

/// Default URL parameter for the time range's upper bound.
pub const DEFAULT_UPPER_PARAM: &str = "upper";

/// Default lower bound of a freshly mounted dashboard.
pub const DEFAULT_TIME_RANGE_LOWER: &str = "now() - 1h";

/// Timeout for waiting on an in-flight query owned by another caller (30 seconds).
///
/// After it elapses the waiter re-checks the cache entry instead of hanging
/// on a leader that never completes.
pub const PENDING_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum number of concurrent variable resolutions per wave.
pub const MIN_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default parallelism.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default parallelism: `max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)`.
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1);
    (cores * PARALLELISM_CORE_MULTIPLIER).max(MIN_PARALLELISM)
}

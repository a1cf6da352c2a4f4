//! Core types for dashvars
//!
//! This module holds the vocabulary shared by every other module:
//!
//! ## `variable` - Definitions
//! - [`Variable`] / [`VariableKind`] - constant, query and map variables
//! - [`Cell`] - a visualization cell whose query references variables
//! - [`TimeRange`] - the active range bound to `timeRangeStart` / `timeRangeStop`
//! - [`VariableId`], [`ContextId`], [`CellId`] - string newtypes
//!
//! ## `error` - Error Handling
//! - [`ResolveError`] - per-variable failures stored in variable status
//! - [`DashvarError`] - failures of public operations
//! - [`ErrorContext`] / [`user_friendly_error`] - CLI presentation

pub mod error;
pub mod variable;

pub use error::{DashvarError, ErrorContext, ResolveError, user_friendly_error};
pub use variable::{
    Cell, CellId, ContextId, TIME_RANGE_START, TIME_RANGE_STOP, TimeRange, Variable, VariableId,
    VariableKind, is_builtin,
};

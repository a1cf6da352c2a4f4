//! Error handling for dashvars
//!
//! Two error families live here:
//! - [`ResolveError`] - per-variable resolution failures. These are *values*: they are
//!   stored in a variable's status, cached negatively by the query cache, and shown
//!   next to the affected variable and cells. None of them is fatal to a dashboard.
//! - [`DashvarError`] - failures of the engine's public operations (unknown ids,
//!   invalid selections, configuration and dashboard file problems).
//!
//! [`ErrorContext`] wraps a [`DashvarError`] with a suggestion and details for CLI
//! display, and [`user_friendly_error`] converts any `anyhow::Error` into one.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dashvars::core::{DashvarError, ErrorContext};
//!
//! let context = ErrorContext::new(DashvarError::UnknownVariable {
//!     name: "buckets".to_string(),
//! })
//! .with_suggestion("Check the variable name used after the `v.` prefix");
//!
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// A resolution failure scoped to one variable in one context.
///
/// Stale selections are deliberately absent: a selection that vanished from a
/// freshly produced value list falls back to the default and is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The variable participates in a reference cycle.
    ///
    /// # Fields
    /// - `variable`: name of the variable marked as failed
    /// - `chain`: the cycle, rendered as `a → b → a`
    #[error("Circular variable reference detected for '{variable}': {chain}")]
    CycleDetected {
        /// Variable name
        variable: String,
        /// Rendered cycle
        chain: String,
    },

    /// The query-execution collaborator returned an error.
    #[error("Query for variable '{variable}' failed: {message}")]
    QueryExecutionFailed {
        /// Variable name
        variable: String,
        /// Error reported by the backend
        message: String,
    },

    /// An upstream variable ended in a terminal error, so this one cannot be computed.
    #[error("Variable '{variable}' depends on '{upstream}', which failed to resolve")]
    DependencyFailed {
        /// Variable name
        variable: String,
        /// Name of the failed upstream variable
        upstream: String,
    },

    /// The owning context was torn down while the resolution was in flight.
    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Name of the variable this error is attached to, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::CycleDetected {
                variable,
                ..
            }
            | Self::QueryExecutionFailed {
                variable,
                ..
            }
            | Self::DependencyFailed {
                variable,
                ..
            } => Some(variable),
            Self::Cancelled => None,
        }
    }
}

/// Errors returned by the engine's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DashvarError {
    /// No context with this id is alive.
    #[error("Unknown context: {id}")]
    UnknownContext {
        /// Context id
        id: String,
    },

    /// No variable with this id or name is defined on the dashboard.
    #[error("Unknown variable: {name}")]
    UnknownVariable {
        /// Variable id or name as supplied
        name: String,
    },

    /// No cell with this id exists on the dashboard.
    #[error("Unknown cell: {id}")]
    UnknownCell {
        /// Cell id
        id: String,
    },

    /// The context is a dashboard context where an overlay was required.
    #[error("Context '{id}' is not an editor overlay")]
    NotAnOverlay {
        /// Context id
        id: String,
    },

    /// Two variable definitions share an id or a name.
    #[error("Duplicate variable '{name}'")]
    DuplicateVariable {
        /// Offending id or name
        name: String,
    },

    /// An explicit selection names a value the variable does not currently offer.
    #[error("Value '{value}' is not available for variable '{variable}'")]
    ValueNotAvailable {
        /// Variable name
        variable: String,
        /// Requested value
        value: String,
    },

    /// Engine configuration could not be loaded.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// A dashboard definition file could not be parsed.
    #[error("Invalid dashboard file {file}: {reason}")]
    DashboardParseError {
        /// File that failed to parse
        file: String,
        /// Parser message
        reason: String,
    },

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

/// A [`DashvarError`] with an optional suggestion and details for display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: DashvarError,
    /// How the user might fix it
    pub suggestion: Option<String>,
    /// Extra explanation
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without suggestion or details.
    #[must_use]
    pub const fn new(error: DashvarError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

fn create_error_context(error: DashvarError) -> ErrorContext {
    match &error {
        DashvarError::UnknownVariable {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the variable name; names are case-sensitive")
            .with_details("Variables are referenced by name using the configured prefix, e.g. `v.buckets`"),
        DashvarError::UnknownContext {
            ..
        } => ErrorContext::new(error)
            .with_details("The context was never opened or has already been committed, discarded or unmounted"),
        DashvarError::ValueNotAvailable {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Resolve the dashboard first and pick one of the listed values"),
        DashvarError::DuplicateVariable {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Give every variable a unique id and name within the dashboard"),
        DashvarError::ConfigError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the TOML syntax of your config file or unset DASHVARS_CONFIG"),
        DashvarError::DashboardParseError {
            ..
        } => ErrorContext::new(error).with_suggestion(
            "Check the TOML syntax: every [[variables]] entry needs id, name and type",
        ),
        _ => ErrorContext::new(error),
    }
}

/// Convert any error into a displayable [`ErrorContext`].
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(dashvar_error) = error.downcast_ref::<DashvarError>() {
        return create_error_context(dashvar_error.clone());
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return create_error_context(DashvarError::DashboardParseError {
            file: "dashboard".to_string(),
            reason: toml_error.to_string(),
        });
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::NotFound
    {
        let message = error.chain().map(ToString::to_string).collect::<Vec<_>>().join(": ");
        return ErrorContext::new(DashvarError::Other {
            message,
        })
        .with_suggestion("Check that the file exists and the path is correct");
    }

    // Fall back to the full anyhow chain
    let message = error.chain().map(ToString::to_string).collect::<Vec<_>>().join(": ");
    ErrorContext::new(DashvarError::Other {
        message,
    })
}

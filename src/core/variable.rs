//! Variable, cell and time-range definitions.
//!
//! These are the read-only inputs handed to the engine by the variable CRUD
//! collaborator. The engine never mutates a [`Variable`] definition; selections
//! and resolved values live in the per-context layer of
//! [`VariableStore`](crate::store::VariableStore).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the built-in pseudo-variable bound to the time range's lower bound.
pub const TIME_RANGE_START: &str = "timeRangeStart";

/// Name of the built-in pseudo-variable bound to the time range's upper bound.
pub const TIME_RANGE_STOP: &str = "timeRangeStop";

/// Returns true for the two built-in time-range pseudo-variables.
pub fn is_builtin(name: &str) -> bool {
    name == TIME_RANGE_START || name == TIME_RANGE_STOP
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a variable definition.
    VariableId
);
string_id!(
    /// Identifier of an evaluation context: a dashboard id or an overlay id.
    ContextId
);
string_id!(
    /// Identifier of a visualization cell.
    CellId
);

/// What a variable produces and how its selection is substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariableKind {
    /// A fixed, ordered sequence of values.
    Constant {
        /// The values in display order.
        values: Vec<String>,
    },
    /// A query whose result rows produce the value sequence.
    Query {
        /// Query text, possibly referencing other variables.
        query: String,
    },
    /// Key to value mapping. The selection is a key, queries receive the value.
    Map {
        /// Entries in insertion order.
        #[serde(rename = "map")]
        entries: IndexMap<String, String>,
    },
}

impl VariableKind {
    /// Short lowercase label used in CLI output and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Constant {
                ..
            } => "constant",
            Self::Query {
                ..
            } => "query",
            Self::Map {
                ..
            } => "map",
        }
    }
}

/// A named, selectable value source used inside dashboard and cell queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Unique id.
    pub id: VariableId,
    /// Name referenced in query text (`v.<name>`), unique within a dashboard.
    pub name: String,
    /// Kind and kind-specific arguments.
    #[serde(flatten)]
    pub kind: VariableKind,
    /// Persisted selection. Only the first element is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,
}

impl Variable {
    /// Create a constant variable.
    pub fn constant<I, S>(id: impl Into<VariableId>, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Constant {
                values: values.into_iter().map(Into::into).collect(),
            },
            selected: None,
        }
    }

    /// Create a query variable.
    pub fn query(
        id: impl Into<VariableId>,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Query {
                query: query.into(),
            },
            selected: None,
        }
    }

    /// Create a map variable from ordered `(key, value)` pairs.
    pub fn map<I, K, V>(id: impl Into<VariableId>, name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Map {
                entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            },
            selected: None,
        }
    }

    /// Attach a persisted selection.
    #[must_use]
    pub fn with_selected(mut self, value: impl Into<String>) -> Self {
        self.selected = Some(vec![value.into()]);
        self
    }

    /// The query text, for query variables.
    pub fn query_text(&self) -> Option<&str> {
        match &self.kind {
            VariableKind::Query {
                query,
            } => Some(query),
            _ => None,
        }
    }

    /// Value substituted into queries when `selected` is chosen.
    ///
    /// For map variables the selection is a key and the mapped value is returned;
    /// an unknown key yields `None`. Other kinds substitute the selection itself.
    pub fn substitution_for<'a>(&'a self, selected: &'a str) -> Option<&'a str> {
        match &self.kind {
            VariableKind::Map {
                entries,
            } => entries.get(selected).map(String::as_str),
            _ => Some(selected),
        }
    }
}

/// A visualization cell whose query may reference variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Cell id.
    pub id: CellId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Query text.
    #[serde(default)]
    pub query: String,
}

impl Cell {
    /// Create a cell.
    pub fn new(id: impl Into<CellId>, query: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            query: query.into(),
        }
    }
}

/// The dashboard's active time range.
///
/// Bounds are kept as query-language expressions (`now() - 1h`) or absolute
/// timestamps; the engine never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Lower bound, bound to `timeRangeStart`.
    pub lower: String,
    /// Upper bound, bound to `timeRangeStop`. `None` means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<String>,
}

impl TimeRange {
    /// A range from `lower` until now.
    pub fn since(lower: impl Into<String>) -> Self {
        Self {
            lower: lower.into(),
            upper: None,
        }
    }

    /// Expression substituted for `timeRangeStart`.
    pub fn start(&self) -> &str {
        &self.lower
    }

    /// Expression substituted for `timeRangeStop`.
    pub fn stop(&self) -> &str {
        self.upper.as_deref().unwrap_or("now()")
    }

    /// Value of a built-in pseudo-variable, or `None` for ordinary names.
    pub fn builtin(&self, name: &str) -> Option<&str> {
        match name {
            TIME_RANGE_START => Some(self.start()),
            TIME_RANGE_STOP => Some(self.stop()),
            _ => None,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start(), self.stop())
    }
}

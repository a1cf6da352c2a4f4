//! The query-execution seam.
//!
//! The engine never talks to a query backend directly. It hands fully
//! substituted query text to a [`QueryExecutor`] and reads one designated
//! column out of the returned [`QueryTable`].

use anyhow::{Result, anyhow, bail};
use futures::future::BoxFuture;
use indexmap::IndexSet;

use crate::config::FixtureEntry;
use crate::core::TimeRange;

/// Tabular query result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTable {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows, one value per column.
    pub rows: Vec<Vec<String>>,
}

impl QueryTable {
    /// A single-column table.
    pub fn single_column<I, S>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: vec![column.to_string()],
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    /// Distinct values of `column` in first-seen order.
    ///
    /// An empty table yields no values. A non-empty table without the column
    /// is an error.
    pub fn distinct_values(&self, column: &str) -> Result<Vec<String>> {
        if self.rows.is_empty() {
            return Ok(Vec::new());
        }
        let index = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| anyhow!("result has no '{column}' column"))?;

        let mut seen = IndexSet::new();
        for row in &self.rows {
            match row.get(index) {
                Some(value) => {
                    seen.insert(value.clone());
                }
                None => bail!("result row has {} values, expected at least {}", row.len(), index + 1),
            }
        }
        Ok(seen.into_iter().collect())
    }
}

/// Executes substituted query text.
///
/// Implementations must be shareable across tasks; the engine calls them
/// concurrently for independent variables.
pub trait QueryExecutor: Send + Sync {
    /// Run `query` against `range` and return its result table.
    fn execute<'a>(&'a self, query: &'a str, range: &'a TimeRange) -> BoxFuture<'a, Result<QueryTable>>;
}

/// Executor answering from canned fixtures, used by the CLI.
#[derive(Debug, Clone)]
pub struct FixtureExecutor {
    fixtures: Vec<FixtureEntry>,
    column: String,
}

impl FixtureExecutor {
    /// Answer with `fixtures`, returning values under `column`.
    pub fn new(fixtures: Vec<FixtureEntry>, column: impl Into<String>) -> Self {
        Self {
            fixtures,
            column: column.into(),
        }
    }

    fn answer(&self, query: &str) -> Result<QueryTable> {
        match self.fixtures.iter().find(|f| query.contains(&f.matches)) {
            Some(FixtureEntry {
                error: Some(message),
                ..
            }) => Err(anyhow!("{message}")),
            Some(fixture) => Ok(QueryTable::single_column(&self.column, fixture.values.iter().cloned())),
            None => {
                tracing::debug!(target: "resolver", "No fixture matches query: {query}");
                Ok(QueryTable::default())
            }
        }
    }
}

impl QueryExecutor for FixtureExecutor {
    fn execute<'a>(&'a self, query: &'a str, _range: &'a TimeRange) -> BoxFuture<'a, Result<QueryTable>> {
        Box::pin(async move { self.answer(query) })
    }
}

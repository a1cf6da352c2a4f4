//! Value resolution for dashboard variables.
//!
//! The [`Resolver`] turns a set of root variables into resolved value lists for
//! one context. It works in dependency waves computed by
//! [`DependencyGraph::plan`]:
//!
//! ```text
//! plan(roots) ──▶ cycle members marked failed
//!      │
//!      ▼
//! wave 0 ─▶ wave 1 ─▶ ...      each wave:
//!                               1. bind references under a read lock
//!                               2. execute queries in parallel (buffer_unordered)
//!                               3. write outcomes under a write lock
//! ```
//!
//! A query variable whose upstream has no selection yet stays *loading*; one
//! whose upstream failed gets [`ResolveError::DependencyFailed`]. Executions go
//! through the shared [`QueryCache`], so identical `(variable, context, inputs)`
//! evaluations run once. Tearing the context down cancels in-flight work and
//! makes any late results disappear. A pass also stops writing once a newer
//! selection or time range bumps the context's generation.

pub mod cache;
pub mod executor;

pub use cache::{CacheStats, QueryCache, QueryKey, QueryState};
pub use executor::{FixtureExecutor, QueryExecutor, QueryTable};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::{ContextId, DashvarError, ResolveError, TimeRange, Variable, VariableId};
use crate::graph::{DependencyGraph, ReferenceScanner, string_literal};
use crate::store::{VariableStatus, VariableStore, static_values};

/// Result of substituting variable references into query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Every reference has a value.
    Ready {
        /// Query text with references replaced by literals.
        query: String,
        /// `(name, value)` of every substituted reference.
        inputs: Vec<(String, String)>,
    },
    /// Referenced variables without a selection yet.
    Waiting(Vec<String>),
    /// A referenced variable ended in an error.
    Failed {
        /// Name of the failed variable.
        upstream: String,
        /// Its error.
        error: ResolveError,
    },
}

/// What one resolution pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Variables that ended ready.
    pub ready: Vec<VariableId>,
    /// Variables still loading (no upstream selection or no values produced).
    pub loading: Vec<VariableId>,
    /// Variables that ended in an error.
    pub failed: Vec<VariableId>,
    /// Variables whose explicit selection vanished and fell back to the default.
    pub stale: Vec<VariableId>,
    /// The context was torn down before the pass finished.
    pub cancelled: bool,
    /// A newer pass started in the same context; later waves were dropped.
    pub superseded: bool,
}

#[derive(Debug)]
enum Outcome {
    Values(Vec<String>),
    Loading,
    Failed(ResolveError),
}

#[derive(Debug)]
enum Work {
    Settled(Outcome),
    Query {
        key: QueryKey,
        query: String,
        name: String,
    },
}

/// Resolves variables of one dashboard in any of its contexts.
pub struct Resolver {
    executor: Arc<dyn QueryExecutor>,
    cache: Arc<QueryCache>,
    scanner: ReferenceScanner,
    graph: DependencyGraph,
    value_column: String,
    max_parallel: usize,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("scanner", &self.scanner)
            .field("graph", &self.graph)
            .field("value_column", &self.value_column)
            .field("max_parallel", &self.max_parallel)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Build a resolver for `variables`.
    pub fn new(
        variables: &[Variable],
        executor: Arc<dyn QueryExecutor>,
        cache: Arc<QueryCache>,
        config: &EngineConfig,
    ) -> Result<Self, DashvarError> {
        let scanner = ReferenceScanner::new(&config.reference_prefix)?;
        let graph = DependencyGraph::build(variables, &scanner);

        for (id, name) in graph.unknown_references() {
            tracing::warn!(target: "resolver", "Variable '{id}' references unknown variable '{name}'");
        }
        for cycle in graph.cycles() {
            tracing::warn!(target: "resolver", "Circular variable reference: {}", cycle.chain);
        }

        Ok(Self {
            executor,
            cache,
            scanner,
            graph,
            value_column: config.value_column.clone(),
            max_parallel: config.max_parallel.max(1),
        })
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The reference scanner.
    pub fn scanner(&self) -> &ReferenceScanner {
        &self.scanner
    }

    /// The shared query cache.
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Substitute the references of `text` as seen from `context`.
    ///
    /// Built-ins are substituted raw, variables as string literals of their
    /// substitution value. Unknown names are left untouched.
    pub fn bind(
        &self,
        store: &VariableStore,
        context: &ContextId,
        text: &str,
        range: &TimeRange,
    ) -> Result<Binding, DashvarError> {
        let mut inputs = Vec::new();
        let mut waiting = Vec::new();

        for name in self.scanner.references(text) {
            if let Some(value) = range.builtin(name) {
                inputs.push((name.to_string(), value.to_string()));
                continue;
            }
            let Some(variable) = store.variable_by_name(name) else {
                continue;
            };
            let hydrated = store.hydrate(context, &variable.id)?;
            if let VariableStatus::Error(error) = &hydrated.status {
                return Ok(Binding::Failed {
                    upstream: name.to_string(),
                    error: error.clone(),
                });
            }
            match (&hydrated.status, hydrated.substitution()) {
                (VariableStatus::Ready, Some(value)) => inputs.push((name.to_string(), value.to_string())),
                _ => waiting.push(name.to_string()),
            }
        }

        if !waiting.is_empty() {
            return Ok(Binding::Waiting(waiting));
        }

        let query = self.scanner.rewrite(text, |name| {
            if let Some(value) = range.builtin(name) {
                return Some(value.to_string());
            }
            inputs.iter().find(|(n, _)| n == name).map(|(_, v)| string_literal(v))
        });
        Ok(Binding::Ready {
            query,
            inputs,
        })
    }

    /// Resolve `roots` and everything upstream of them in `context`.
    pub async fn resolve(
        &self,
        store: &RwLock<VariableStore>,
        context: &ContextId,
        roots: &[VariableId],
        range: &TimeRange,
    ) -> Result<ResolutionReport, DashvarError> {
        let generation = store.read().await.generation(context)?;
        self.resolve_at(store, context, roots, range, generation).await
    }

    /// Like [`resolve`](Self::resolve), for inputs read at `generation`.
    ///
    /// Nothing is written once the context's generation moves past it.
    pub async fn resolve_at(
        &self,
        store: &RwLock<VariableStore>,
        context: &ContextId,
        roots: &[VariableId],
        range: &TimeRange,
        generation: u64,
    ) -> Result<ResolutionReport, DashvarError> {
        let cancel = store.read().await.context(context)?.cancel.clone();
        let plan = self.graph.plan(roots);
        let mut report = ResolutionReport::default();

        tracing::debug!(
            target: "resolver",
            "Resolving {} variables in {} waves for {}",
            plan.variables().count(),
            plan.waves.len(),
            context
        );

        if !plan.failed.is_empty() {
            let mut guard = store.write().await;
            if !Self::current(&guard, context, &cancel, generation, &mut report) {
                return Ok(report);
            }
            for (id, error) in &plan.failed {
                Self::apply(&mut guard, context, id, Outcome::Failed(error.clone()), &mut report)?;
            }
        }

        for (index, wave) in plan.waves.iter().enumerate() {
            let jobs = {
                let guard = store.read().await;
                if !Self::current(&guard, context, &cancel, generation, &mut report) {
                    return Ok(report);
                }
                wave.iter()
                    .map(|id| Ok((id.clone(), self.prepare(&guard, context, id, range)?)))
                    .collect::<Result<Vec<_>, DashvarError>>()?
            };
            tracing::trace!(target: "resolver", "Wave {index} for {context}: {} variables", jobs.len());

            let token = &cancel;
            let outcomes: Vec<(VariableId, Outcome)> = stream::iter(jobs)
                .map(|(id, work)| async move {
                    let outcome = self.run(work, range, token).await;
                    (id, outcome)
                })
                .buffer_unordered(self.max_parallel)
                .collect()
                .await;

            let mut guard = store.write().await;
            if !Self::current(&guard, context, &cancel, generation, &mut report) {
                return Ok(report);
            }
            for (id, outcome) in outcomes {
                Self::apply(&mut guard, context, &id, outcome, &mut report)?;
            }
        }

        Ok(report)
    }

    /// Whether this pass may still write to `context`.
    ///
    /// A pass writes only while its context is alive and no selection or time
    /// range changed since it started; otherwise its results are dropped.
    fn current(
        store: &VariableStore,
        context: &ContextId,
        cancel: &CancellationToken,
        generation: u64,
        report: &mut ResolutionReport,
    ) -> bool {
        let alive = !cancel.is_cancelled();
        match store.generation(context) {
            Ok(current) if alive && current == generation => true,
            Ok(current) if alive => {
                tracing::debug!(
                    target: "resolver",
                    "Pass {generation} for {context} superseded by {current}; dropping results"
                );
                report.superseded = true;
                false
            }
            _ => {
                tracing::debug!(target: "resolver", "Context {context} torn down; dropping results");
                report.cancelled = true;
                false
            }
        }
    }

    fn prepare(
        &self,
        store: &VariableStore,
        context: &ContextId,
        id: &VariableId,
        range: &TimeRange,
    ) -> Result<Work, DashvarError> {
        let variable = store.variable(id)?;
        if let Some(values) = static_values(variable) {
            return Ok(Work::Settled(Outcome::Values(values)));
        }

        let text = variable.query_text().unwrap_or_default();
        let work = match self.bind(store, context, text, range)? {
            Binding::Ready {
                query,
                inputs,
            } => Work::Query {
                key: QueryKey::new(id.clone(), context.clone(), inputs),
                query,
                name: variable.name.clone(),
            },
            Binding::Waiting(names) => {
                tracing::debug!(
                    target: "resolver",
                    "'{}' waits on {} in {context}",
                    variable.name,
                    names.join(", ")
                );
                Work::Settled(Outcome::Loading)
            }
            Binding::Failed {
                upstream,
                ..
            } => Work::Settled(Outcome::Failed(ResolveError::DependencyFailed {
                variable: variable.name.clone(),
                upstream,
            })),
        };
        Ok(work)
    }

    async fn run(&self, work: Work, range: &TimeRange, cancel: &CancellationToken) -> Outcome {
        match work {
            Work::Settled(outcome) => outcome,
            Work::Query {
                key,
                query,
                name,
            } => {
                let result =
                    self.cache.get_or_execute(&key, cancel, || self.execute(&name, &query, range)).await;
                match result {
                    Ok(values) => Outcome::Values(values.as_ref().clone()),
                    Err(error) => Outcome::Failed(error),
                }
            }
        }
    }

    async fn execute(&self, name: &str, query: &str, range: &TimeRange) -> Result<Vec<String>, ResolveError> {
        let failed = |e: anyhow::Error| ResolveError::QueryExecutionFailed {
            variable: name.to_string(),
            message: format!("{e:#}"),
        };
        let table = self.executor.execute(query, range).await.map_err(failed)?;
        table.distinct_values(&self.value_column).map_err(failed)
    }

    fn apply(
        store: &mut VariableStore,
        context: &ContextId,
        id: &VariableId,
        outcome: Outcome,
        report: &mut ResolutionReport,
    ) -> Result<(), DashvarError> {
        let name = store.variable(id)?.name.clone();
        let entry = store.override_mut(context, id)?;

        match outcome {
            Outcome::Values(values) => {
                let stale = entry.explicit
                    && !values.is_empty()
                    && entry.selected.as_ref().and_then(|s| s.first()).is_some_and(|choice| !values.contains(choice));
                if stale {
                    tracing::debug!(
                        target: "resolver",
                        "Selection {:?} of '{name}' is no longer offered in {context}; using default",
                        entry.selected
                    );
                    entry.selected = None;
                    entry.explicit = false;
                    report.stale.push(id.clone());
                }
                if values.is_empty() {
                    report.loading.push(id.clone());
                } else {
                    report.ready.push(id.clone());
                }
                entry.values = Some(values);
                entry.status = Some(VariableStatus::Ready);
            }
            Outcome::Loading => {
                entry.values = None;
                entry.status = Some(VariableStatus::Loading);
                report.loading.push(id.clone());
            }
            Outcome::Failed(ResolveError::Cancelled) => {
                report.cancelled = true;
            }
            Outcome::Failed(error) => {
                tracing::debug!(target: "resolver", "'{name}' failed in {context}: {error}");
                entry.values = None;
                entry.status = Some(VariableStatus::Error(error));
                report.failed.push(id.clone());
            }
        }
        Ok(())
    }
}

//! A mounted dashboard and its editor overlays.
//!
//! [`DashboardSession`] is the engine's public surface. It owns the variable
//! store, the resolver, the context manager and the URL state for one
//! dashboard, and is safe to share across tasks behind an `Arc`.
//!
//! # Lock order
//!
//! `view` before `store`. Neither lock is held while the resolver runs; the
//! resolver takes the store lock itself, per wave.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dashvars::config::{DashboardFile, EngineConfig};
//! use dashvars::resolver::FixtureExecutor;
//! use dashvars::session::DashboardSession;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let file = DashboardFile::load(std::path::Path::new("dashboard.toml")).await?;
//! let config = EngineConfig::default();
//! let executor = Arc::new(FixtureExecutor::new(file.fixtures.clone(), config.value_column.clone()));
//! let session = DashboardSession::from_file(&file, executor, config)?;
//!
//! session.mount("?vars%5BCSVVariable%5D=c3").await?;
//! let dash = session.dashboard_context().clone();
//! session.select(&dash, "CSVVariable", "c2").await?;
//! println!("{}", session.search().await);
//! # Ok(())
//! # }
//! ```

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{DashboardFile, EngineConfig};
use crate::context::ContextManager;
use crate::core::{Cell, CellId, ContextId, DashvarError, ResolveError, TimeRange, Variable, VariableId};
use crate::graph::DependencyGraph;
use crate::resolver::{Binding, CacheStats, QueryCache, QueryExecutor, ResolutionReport, Resolver};
use crate::store::{HydratedVariable, VariableStatus, VariableStore};
use crate::url::UrlState;

/// What the UI shows for one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableView {
    /// Variable id.
    pub id: VariableId,
    /// Variable name.
    pub name: String,
    /// `constant`, `query` or `map`.
    pub kind: &'static str,
    /// `loading`, `ready` or `error`.
    pub status: &'static str,
    /// Error message when `status` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Selected value (a key, for maps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    /// Value substituted into queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substitution: Option<String>,
    /// Whether the selection is explicit.
    pub explicit: bool,
    /// Values offered for selection.
    pub values: Vec<String>,
}

impl From<&HydratedVariable> for VariableView {
    fn from(hydrated: &HydratedVariable) -> Self {
        Self {
            id: hydrated.variable.id.clone(),
            name: hydrated.variable.name.clone(),
            kind: hydrated.variable.kind.label(),
            status: hydrated.status.label(),
            error: match &hydrated.status {
                VariableStatus::Error(error) => Some(error.to_string()),
                _ => None,
            },
            selected: hydrated.selected_value().map(str::to_string),
            substitution: hydrated.substitution().map(str::to_string),
            explicit: hydrated.explicit,
            values: hydrated.values.clone(),
        }
    }
}

/// Whether a cell's query can be handed to the query collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellStatus {
    /// Every reference substituted.
    Ready {
        /// Query text ready for execution.
        query: String,
    },
    /// Referenced variables still without a selection.
    Loading {
        /// Their names.
        waiting_on: Vec<String>,
    },
    /// A referenced variable failed.
    Error {
        /// Name of the failed variable.
        variable: String,
        /// Its error.
        error: ResolveError,
    },
}

#[derive(Debug)]
struct ViewState {
    cells: IndexMap<CellId, Cell>,
    time_range: TimeRange,
    url: UrlState,
}

/// One mounted dashboard.
#[derive(Debug)]
pub struct DashboardSession {
    dashboard: ContextId,
    config: EngineConfig,
    resolver: Resolver,
    contexts: ContextManager,
    store: RwLock<VariableStore>,
    view: RwLock<ViewState>,
}

impl DashboardSession {
    /// Create a session for a dashboard. Nothing resolves until [`mount`](Self::mount).
    pub fn new(
        dashboard: impl Into<ContextId>,
        variables: Vec<Variable>,
        cells: Vec<Cell>,
        executor: Arc<dyn QueryExecutor>,
        config: EngineConfig,
    ) -> Result<Self, DashvarError> {
        config.validate()?;
        let dashboard = dashboard.into();
        let cache = Arc::new(QueryCache::new(config.pending_timeout()));
        let resolver = Resolver::new(&variables, executor, cache.clone(), &config)?;
        let contexts = ContextManager::new(cache);

        let mut store = VariableStore::new(variables)?;
        contexts.open_dashboard(&mut store, dashboard.clone());

        let view = ViewState {
            cells: cells.into_iter().map(|cell| (cell.id.clone(), cell)).collect(),
            time_range: TimeRange::since(config.default_time_range_lower.clone()),
            url: UrlState::new(&config),
        };

        Ok(Self {
            dashboard,
            config,
            resolver,
            contexts,
            store: RwLock::new(store),
            view: RwLock::new(view),
        })
    }

    /// Create a session from a dashboard file.
    pub fn from_file(
        file: &DashboardFile,
        executor: Arc<dyn QueryExecutor>,
        config: EngineConfig,
    ) -> Result<Self, DashvarError> {
        let session = Self::new(file.id.as_str(), file.variables.clone(), file.cells.clone(), executor, config)?;
        Ok(match &file.time_range {
            Some(range) => session.with_time_range(range.clone()),
            None => session,
        })
    }

    /// Replace the initial time range. URL parameters still win on mount.
    #[must_use]
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.view.get_mut().time_range = range;
        self
    }

    /// The dashboard context id.
    pub fn dashboard_context(&self) -> &ContextId {
        &self.dashboard
    }

    /// The variable dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        self.resolver.graph()
    }

    /// Query cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }

    /// Engine configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seed state from the URL search string and resolve the dashboard.
    ///
    /// The URL time range wins over the dashboard's own. Overrides for unknown
    /// variables are ignored. The lower bound is always written back.
    pub async fn mount(&self, search: &str) -> Result<ResolutionReport, DashvarError> {
        let seeded = {
            let mut view = self.view.write().await;
            let mut store = self.store.write().await;
            let url = UrlState::parse(search, &self.config);

            if let Some(range) = url.time_range() {
                view.time_range = range;
            }
            view.url = url;
            let range = view.time_range.clone();
            view.url.set_time_range(&range);

            let mut seeded = Vec::new();
            for (name, value) in view.url.variables() {
                match store.variable_by_name(&name).map(|v| v.id.clone()) {
                    Some(id) => {
                        store.set_explicit(&self.dashboard, &id, value)?;
                        seeded.push(id);
                    }
                    None => tracing::debug!(target: "url", "Ignoring override for unknown variable '{name}'"),
                }
            }
            seeded
        };

        tracing::info!(
            target: "context",
            "Mounting dashboard {} with {} URL overrides",
            self.dashboard,
            seeded.len()
        );
        let report = self.resolve(&self.dashboard).await?;
        self.sync_url(&seeded).await?;
        Ok(report)
    }

    /// Resolve every variable the context's cells need.
    pub async fn resolve(&self, context: &ContextId) -> Result<ResolutionReport, DashvarError> {
        let (roots, range, generation) = {
            let view = self.view.read().await;
            let store = self.store.read().await;
            (self.roots(&view, &store, context)?, view.time_range.clone(), store.generation(context)?)
        };

        let report = self.resolver.resolve_at(&self.store, context, &roots, &range, generation).await?;
        tracing::debug!(
            target: "resolver",
            "{context}: {} ready, {} loading, {} failed{}",
            report.ready.len(),
            report.loading.len(),
            report.failed.len(),
            if report.superseded { " (superseded)" } else { "" }
        );
        if *context == self.dashboard && !report.stale.is_empty() {
            self.sync_url(&report.stale).await?;
        }
        Ok(report)
    }

    /// Forget cached failures of `context` and resolve it again.
    pub async fn refresh(&self, context: &ContextId) -> Result<ResolutionReport, DashvarError> {
        self.store.read().await.context(context)?;
        let cleared = self.resolver.cache().clear_failures(context);
        tracing::debug!(target: "cache", "Cleared {cleared} failed entries of {context}");
        self.resolve(context).await
    }

    /// Explicitly select `value` for a variable (by id or name) and re-resolve.
    pub async fn select(
        &self,
        context: &ContextId,
        variable: &str,
        value: &str,
    ) -> Result<ResolutionReport, DashvarError> {
        let id = {
            let mut store = self.store.write().await;
            let id = Self::lookup(&store, variable)?;
            let hydrated = store.hydrate(context, &id)?;
            if !hydrated.values.iter().any(|v| v == value) {
                return Err(DashvarError::ValueNotAvailable {
                    variable: hydrated.variable.name,
                    value: value.to_string(),
                });
            }
            store.set_explicit(context, &id, value)?;
            id
        };
        tracing::debug!(target: "context", "Selected '{value}' for '{variable}' in {context}");

        let report = self.resolve(context).await?;
        if *context == self.dashboard {
            self.sync_url(std::slice::from_ref(&id)).await?;
        }
        Ok(report)
    }

    /// Effective state of a variable (by id or name).
    pub async fn hydrated(&self, context: &ContextId, variable: &str) -> Result<HydratedVariable, DashvarError> {
        let store = self.store.read().await;
        let id = Self::lookup(&store, variable)?;
        store.hydrate(context, &id)
    }

    /// UI view of a variable (by id or name).
    pub async fn view(&self, context: &ContextId, variable: &str) -> Result<VariableView, DashvarError> {
        Ok(VariableView::from(&self.hydrated(context, variable).await?))
    }

    /// Views of every variable the context needs, in dashboard order.
    pub async fn variables_in_scope(&self, context: &ContextId) -> Result<Vec<VariableView>, DashvarError> {
        let view = self.view.read().await;
        let store = self.store.read().await;
        let roots = self.roots(&view, &store, context)?;
        let scope = self.resolver.graph().upstream_closure(&roots);

        store
            .variables()
            .filter(|v| scope.contains(&v.id))
            .map(|v| store.hydrate(context, &v.id).map(|h| VariableView::from(&h)))
            .collect()
    }

    /// Whether a cell's query is executable in `context`, and its substituted text.
    pub async fn cell_status(&self, context: &ContextId, cell: &CellId) -> Result<CellStatus, DashvarError> {
        let view = self.view.read().await;
        let store = self.store.read().await;
        store.context(context)?;

        let text = match store.draft_for(context, cell) {
            Some(draft) => draft.query.clone(),
            None => view
                .cells
                .get(cell)
                .map(|c| c.query.clone())
                .ok_or_else(|| DashvarError::UnknownCell {
                    id: cell.to_string(),
                })?,
        };

        let status = match self.resolver.bind(&store, context, &text, &view.time_range)? {
            Binding::Ready {
                query,
                ..
            } => CellStatus::Ready {
                query,
            },
            Binding::Waiting(waiting_on) => CellStatus::Loading {
                waiting_on,
            },
            Binding::Failed {
                upstream,
                error,
            } => CellStatus::Error {
                variable: upstream,
                error,
            },
        };
        Ok(status)
    }

    /// Persisted cells in dashboard order.
    pub async fn cells(&self) -> Vec<Cell> {
        self.view.read().await.cells.values().cloned().collect()
    }

    /// Open an editor overlay on `source` for an existing cell, or a new one.
    pub async fn open_overlay(&self, source: &ContextId, cell: Option<&CellId>) -> Result<ContextId, DashvarError> {
        let overlay = {
            let view = self.view.read().await;
            let mut store = self.store.write().await;
            let (cell, existing) = match cell {
                Some(id) => {
                    let cell = view.cells.get(id).cloned().ok_or_else(|| DashvarError::UnknownCell {
                        id: id.to_string(),
                    })?;
                    (cell, true)
                }
                None => (Cell::new(format!("cell-{}", Uuid::new_v4().simple()), ""), false),
            };
            let scope = self.scope_of(&store, &cell.query);
            self.contexts.open_overlay(&mut store, source, cell, existing, &scope)?
        };
        self.resolve(&overlay).await?;
        Ok(overlay)
    }

    /// Replace the overlay's draft query and resolve what it now needs.
    pub async fn set_draft_query(&self, overlay: &ContextId, query: &str) -> Result<ResolutionReport, DashvarError> {
        {
            let mut store = self.store.write().await;
            self.contexts.set_draft_query(&mut store, overlay, query)?;
            let scope = self.scope_of(&store, query);
            self.contexts.adopt(&mut store, overlay, &scope)?;
        }
        self.resolve(overlay).await
    }

    /// Save the overlay's cell and selections into its source, then close it.
    pub async fn commit_overlay(&self, overlay: &ContextId) -> Result<Cell, DashvarError> {
        let outcome = {
            let mut view = self.view.write().await;
            let mut store = self.store.write().await;
            let query = store.overlay(overlay)?.cell.query.clone();
            let scope = self.scope_of(&store, &query);
            let outcome = self.contexts.commit_overlay(&mut store, overlay, &scope)?;
            if outcome.source == self.dashboard {
                view.cells.insert(outcome.cell.id.clone(), outcome.cell.clone());
            }
            outcome
        };

        if outcome.source == self.dashboard {
            self.sync_url(&outcome.changed).await?;
        }
        self.resolve(&outcome.source).await?;
        Ok(outcome.cell)
    }

    /// Close the overlay without touching its source.
    pub async fn discard_overlay(&self, overlay: &ContextId) -> Result<(), DashvarError> {
        let mut store = self.store.write().await;
        self.contexts.discard_overlay(&mut store, overlay)?;
        Ok(())
    }

    /// Change the time range, update the URL and re-resolve every open context.
    pub async fn set_time_range(&self, range: TimeRange) -> Result<ResolutionReport, DashvarError> {
        let overlays = {
            let mut view = self.view.write().await;
            view.url.set_time_range(&range);
            view.time_range = range;
            let mut store = self.store.write().await;
            let ids = store.context_ids();
            for id in &ids {
                store.touch(id)?;
            }
            ids.into_iter().filter(|id| *id != self.dashboard).collect::<Vec<_>>()
        };

        let report = self.resolve(&self.dashboard).await?;
        for overlay in overlays {
            match self.resolve(&overlay).await {
                Ok(_) | Err(DashvarError::UnknownContext { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// The active time range.
    pub async fn time_range(&self) -> TimeRange {
        self.view.read().await.time_range.clone()
    }

    /// The URL search string reflecting current state.
    pub async fn search(&self) -> String {
        self.view.read().await.url.to_search()
    }

    /// Tear down every context. The session is unusable afterwards.
    pub async fn unmount(&self) {
        let mut store = self.store.write().await;
        for id in store.context_ids() {
            self.contexts.close(&mut store, &id);
        }
        tracing::info!(target: "context", "Unmounted dashboard {}", self.dashboard);
    }

    fn lookup(store: &VariableStore, key: &str) -> Result<VariableId, DashvarError> {
        let id = VariableId::new(key);
        if store.variable(&id).is_ok() {
            return Ok(id);
        }
        store.variable_by_name(key).map(|v| v.id.clone()).ok_or_else(|| DashvarError::UnknownVariable {
            name: key.to_string(),
        })
    }

    /// Variables directly referenced by `text`.
    fn references(&self, store: &VariableStore, text: &str) -> Vec<VariableId> {
        self.resolver
            .scanner()
            .references(text)
            .into_iter()
            .filter_map(|name| store.variable_by_name(name).map(|v| v.id.clone()))
            .collect()
    }

    /// Variables referenced by `text` plus everything upstream of them.
    fn scope_of(&self, store: &VariableStore, text: &str) -> HashSet<VariableId> {
        let direct = self.references(store, text);
        self.resolver.graph().upstream_closure(&direct)
    }

    fn roots(&self, view: &ViewState, store: &VariableStore, context: &ContextId) -> Result<Vec<VariableId>, DashvarError> {
        let record = store.context(context)?;
        let mut roots = Vec::new();
        let texts: Vec<&str> = match record.overlay() {
            Some(draft) => vec![draft.cell.query.as_str()],
            None => view.cells.values().map(|c| c.query.as_str()).collect(),
        };
        for text in texts {
            for id in self.references(store, text) {
                if !roots.contains(&id) {
                    roots.push(id);
                }
            }
        }
        Ok(roots)
    }

    /// Reflect the dashboard selection of `variables` in the URL.
    async fn sync_url(&self, variables: &[VariableId]) -> Result<(), DashvarError> {
        if variables.is_empty() {
            return Ok(());
        }
        let mut view = self.view.write().await;
        let store = self.store.read().await;
        for id in variables {
            let hydrated = store.hydrate(&self.dashboard, id)?;
            let value = hydrated.is_non_default().then(|| hydrated.selected_value()).flatten();
            view.url.set_variable(&hydrated.variable.name, value);
        }
        Ok(())
    }
}

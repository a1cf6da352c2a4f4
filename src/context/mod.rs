//! Context lifecycle: dashboard contexts and cell-editor overlays.
//!
//! An overlay starts as a copy of its source context's state for the variables
//! the edited cell needs, including their cached query results. From then on
//! the two evolve independently until the overlay is either committed (its
//! selections are copied back to the source) or discarded (dropped without a
//! trace). Both end the overlay: its token is cancelled, so in-flight work
//! stops, and its cache entries are evicted.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::{Cell, ContextId, DashvarError, VariableId};
use crate::resolver::QueryCache;
use crate::store::{ContextKind, OverlayDraft, VariableStore};

/// Result of committing an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Context that received the selections.
    pub source: ContextId,
    /// The saved cell.
    pub cell: Cell,
    /// False when the cell is new.
    pub existing: bool,
    /// Variables whose selection in the source changed.
    pub changed: Vec<VariableId>,
}

/// Opens, commits and discards contexts.
#[derive(Debug, Clone)]
pub struct ContextManager {
    cache: Arc<QueryCache>,
}

impl ContextManager {
    /// Create a manager sharing `cache` with the resolver.
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self {
            cache,
        }
    }

    /// Register the dashboard context.
    pub fn open_dashboard(&self, store: &mut VariableStore, id: ContextId) {
        tracing::debug!(target: "context", "Opening dashboard context {id}");
        store.open_context(id, ContextKind::Dashboard);
    }

    /// Open an overlay on `source` for editing `cell`.
    ///
    /// `scope` lists the variables whose state is cloned; it is usually the
    /// cell's references plus everything upstream of them.
    pub fn open_overlay(
        &self,
        store: &mut VariableStore,
        source: &ContextId,
        cell: Cell,
        existing: bool,
        scope: &HashSet<VariableId>,
    ) -> Result<ContextId, DashvarError> {
        store.context(source)?;
        let id = ContextId::new(format!("{source}/overlay-{}", Uuid::new_v4().simple()));
        store.open_context(
            id.clone(),
            ContextKind::Overlay(OverlayDraft {
                source: source.clone(),
                cell,
                existing,
            }),
        );
        let adopted = self.adopt(store, &id, scope)?;
        tracing::debug!(target: "context", "Opened overlay {id} on {source} with {adopted} variables");
        Ok(id)
    }

    /// Clone source state for variables the overlay has not seen yet.
    ///
    /// Variables the overlay already holds keep their overlay state.
    pub fn adopt(
        &self,
        store: &mut VariableStore,
        overlay: &ContextId,
        variables: &HashSet<VariableId>,
    ) -> Result<usize, DashvarError> {
        let source = store.overlay(overlay)?.source.clone();
        let missing: Vec<VariableId> = {
            let record = store.context(overlay)?;
            variables.iter().filter(|id| !record.overrides.contains_key(*id)).cloned().collect()
        };

        let copies: Vec<_> = {
            let source_record = store.context(&source)?;
            missing
                .iter()
                .filter_map(|id| source_record.overrides.get(id).map(|entry| (id.clone(), entry.clone())))
                .collect()
        };

        let target = store.context_mut(overlay)?;
        for (id, entry) in copies {
            target.overrides.insert(id, entry);
        }
        self.cache.clone_context(&source, overlay, &missing);
        Ok(missing.len())
    }

    /// Replace the overlay's draft query.
    pub fn set_draft_query(
        &self,
        store: &mut VariableStore,
        overlay: &ContextId,
        query: impl Into<String>,
    ) -> Result<(), DashvarError> {
        store.overlay(overlay)?;
        if let ContextKind::Overlay(draft) = &mut store.context_mut(overlay)?.kind {
            draft.cell.query = query.into();
        }
        Ok(())
    }

    /// Copy the overlay's selections for `scope` into its source and close it.
    pub fn commit_overlay(
        &self,
        store: &mut VariableStore,
        overlay: &ContextId,
        scope: &HashSet<VariableId>,
    ) -> Result<CommitOutcome, DashvarError> {
        let draft = store.overlay(overlay)?.clone();
        let picks: Vec<_> = {
            let record = store.context(overlay)?;
            scope
                .iter()
                .filter_map(|id| record.overrides.get(id).map(|e| (id.clone(), e.selected.clone(), e.explicit)))
                .collect()
        };

        let mut changed = Vec::new();
        for (id, selected, explicit) in picks {
            let entry = store.override_mut(&draft.source, &id)?;
            if entry.selected != selected || entry.explicit != explicit {
                entry.selected = selected;
                entry.explicit = explicit;
                changed.push(id);
            }
        }
        changed.sort();
        if !changed.is_empty() {
            store.touch(&draft.source)?;
        }

        let variables: Vec<&VariableId> = scope.iter().collect();
        self.cache.clone_context(overlay, &draft.source, variables);
        self.close(store, overlay);

        tracing::info!(
            target: "context",
            "Committed overlay {overlay} into {} ({} selections changed)",
            draft.source,
            changed.len()
        );
        Ok(CommitOutcome {
            source: draft.source,
            cell: draft.cell,
            existing: draft.existing,
            changed,
        })
    }

    /// Drop the overlay and everything it computed.
    pub fn discard_overlay(&self, store: &mut VariableStore, overlay: &ContextId) -> Result<OverlayDraft, DashvarError> {
        let draft = store.overlay(overlay)?.clone();
        self.close(store, overlay);
        tracing::debug!(target: "context", "Discarded overlay {overlay}");
        Ok(draft)
    }

    /// Tear down any context: cancel its work and evict its cache entries.
    pub fn close(&self, store: &mut VariableStore, id: &ContextId) -> bool {
        let closed = store.close_context(id).is_some();
        self.cache.evict_context(id);
        closed
    }
}

//! Variable store: definitions plus an arena of per-context override layers.
//!
//! Definitions are immutable for the life of a store. Everything that changes -
//! selections, resolved value lists, statuses - lives in a [`ContextRecord`]
//! keyed by [`ContextId`]. Tearing a context down is a single map removal, and
//! no record ever points into another, so overlays cannot alias the dashboard.
//!
//! [`VariableStore::hydrate`] merges a definition with one context's override
//! and applies the default-selection rule:
//!
//! - no explicit choice → the persisted `selected` when it is a produced value,
//!   otherwise the first produced value (first key for maps)
//! - explicit choice still produced → kept
//! - explicit choice no longer produced → default (a stale selection is not an error)

use indexmap::IndexMap;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::core::{Cell, CellId, ContextId, DashvarError, ResolveError, Variable, VariableId, VariableKind};

/// Resolution state of a variable in a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableStatus {
    /// Waiting on an upstream selection or on its own query.
    Loading,
    /// Values are known.
    Ready,
    /// Terminal failure.
    Error(ResolveError),
}

impl VariableStatus {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error(_) => "error",
        }
    }
}

/// One variable's entry in a context layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableOverride {
    /// Selection recorded for this context.
    pub selected: Option<Vec<String>>,
    /// Whether `selected` came from the user (or a shared URL) rather than defaults.
    pub explicit: bool,
    /// Produced values as of the last resolution in this context.
    pub values: Option<Vec<String>>,
    /// Status as of the last resolution; `None` until first resolved here.
    pub status: Option<VariableStatus>,
}

/// An open editor overlay's private state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayDraft {
    /// Context the overlay was cloned from and commits back into.
    pub source: ContextId,
    /// Draft of the cell being edited.
    pub cell: Cell,
    /// False when the overlay creates a new cell.
    pub existing: bool,
}

/// What kind of context a record is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// The dashboard view, source of truth for what the dashboard renders.
    Dashboard,
    /// A cell-editor overlay.
    Overlay(OverlayDraft),
}

/// One slot in the context arena.
#[derive(Debug)]
pub struct ContextRecord {
    /// Context id.
    pub id: ContextId,
    /// Dashboard or overlay.
    pub kind: ContextKind,
    /// Per-variable overrides, created lazily.
    pub overrides: HashMap<VariableId, VariableOverride>,
    /// Cancelled when the context is torn down.
    pub cancel: CancellationToken,
    /// Bumped whenever the inputs of a resolution pass change.
    pub generation: u64,
}

impl ContextRecord {
    /// The overlay draft, if this is an overlay.
    pub fn overlay(&self) -> Option<&OverlayDraft> {
        match &self.kind {
            ContextKind::Overlay(draft) => Some(draft),
            ContextKind::Dashboard => None,
        }
    }
}

/// Effective view of a variable in one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedVariable {
    /// The definition.
    pub variable: Variable,
    /// Effective selection; empty only while nothing can be selected.
    pub selected: Vec<String>,
    /// Whether the selection is an explicit (sticky) choice.
    pub explicit: bool,
    /// Values offered for selection (keys, for maps).
    pub values: Vec<String>,
    /// Effective status.
    pub status: VariableStatus,
}

impl HydratedVariable {
    /// The single-select value (a key, for maps).
    pub fn selected_value(&self) -> Option<&str> {
        self.selected.first().map(String::as_str)
    }

    /// The value substituted into queries (the mapped value, for maps).
    pub fn substitution(&self) -> Option<&str> {
        self.selected_value().and_then(|selected| self.variable.substitution_for(selected))
    }

    /// The default selection for the current values.
    pub fn default_value(&self) -> Option<&str> {
        default_selection(&self.variable, &self.values)
    }

    /// True when an explicit selection differs from the default.
    pub fn is_non_default(&self) -> bool {
        self.explicit && self.selected_value() != self.default_value()
    }
}

/// Values a variable offers without executing anything.
///
/// Constants offer their values, maps their keys, query variables nothing.
pub fn static_values(variable: &Variable) -> Option<Vec<String>> {
    match &variable.kind {
        VariableKind::Constant {
            values,
        } => Some(values.clone()),
        VariableKind::Map {
            entries,
        } => Some(entries.keys().cloned().collect()),
        VariableKind::Query {
            ..
        } => None,
    }
}

/// The default-selection rule.
pub fn default_selection<'a>(variable: &'a Variable, values: &'a [String]) -> Option<&'a str> {
    let persisted = variable.selected.as_ref().and_then(|s| s.first());
    match persisted {
        Some(choice) if values.contains(choice) => Some(choice.as_str()),
        _ => values.first().map(String::as_str),
    }
}

/// Variable definitions and the context arena.
#[derive(Debug)]
pub struct VariableStore {
    definitions: IndexMap<VariableId, Variable>,
    contexts: HashMap<ContextId, ContextRecord>,
}

impl VariableStore {
    /// Create a store, rejecting duplicate ids or names.
    pub fn new(variables: Vec<Variable>) -> Result<Self, DashvarError> {
        let mut definitions = IndexMap::with_capacity(variables.len());
        for variable in variables {
            if definitions.contains_key(&variable.id) {
                return Err(DashvarError::DuplicateVariable {
                    name: variable.id.to_string(),
                });
            }
            if definitions.values().any(|v: &Variable| v.name == variable.name) {
                return Err(DashvarError::DuplicateVariable {
                    name: variable.name,
                });
            }
            definitions.insert(variable.id.clone(), variable);
        }
        Ok(Self {
            definitions,
            contexts: HashMap::new(),
        })
    }

    /// Definitions in dashboard order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.definitions.values()
    }

    /// A definition by id.
    pub fn variable(&self, id: &VariableId) -> Result<&Variable, DashvarError> {
        self.definitions.get(id).ok_or_else(|| DashvarError::UnknownVariable {
            name: id.to_string(),
        })
    }

    /// A definition by name.
    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.definitions.values().find(|v| v.name == name)
    }

    /// Register a context. Re-opening an existing id replaces it.
    pub fn open_context(&mut self, id: ContextId, kind: ContextKind) -> CancellationToken {
        let cancel = CancellationToken::new();
        let record = ContextRecord {
            id: id.clone(),
            kind,
            overrides: HashMap::new(),
            cancel: cancel.clone(),
            generation: 0,
        };
        if let Some(old) = self.contexts.insert(id, record) {
            old.cancel.cancel();
        }
        cancel
    }

    /// Remove a context, cancelling its in-flight work.
    pub fn close_context(&mut self, id: &ContextId) -> Option<ContextRecord> {
        let record = self.contexts.remove(id)?;
        record.cancel.cancel();
        Some(record)
    }

    /// Ids of every open context.
    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.keys().cloned().collect()
    }

    /// A context record.
    pub fn context(&self, id: &ContextId) -> Result<&ContextRecord, DashvarError> {
        self.contexts.get(id).ok_or_else(|| DashvarError::UnknownContext {
            id: id.to_string(),
        })
    }

    /// A mutable context record.
    pub fn context_mut(&mut self, id: &ContextId) -> Result<&mut ContextRecord, DashvarError> {
        self.contexts.get_mut(id).ok_or_else(|| DashvarError::UnknownContext {
            id: id.to_string(),
        })
    }

    /// Current generation of a context.
    pub fn generation(&self, id: &ContextId) -> Result<u64, DashvarError> {
        Ok(self.context(id)?.generation)
    }

    /// Mark every pass already running in `id` as superseded.
    pub fn touch(&mut self, id: &ContextId) -> Result<u64, DashvarError> {
        let record = self.context_mut(id)?;
        record.generation = record.generation.wrapping_add(1);
        Ok(record.generation)
    }

    /// The draft of an overlay context.
    pub fn overlay(&self, id: &ContextId) -> Result<&OverlayDraft, DashvarError> {
        self.context(id)?.overlay().ok_or_else(|| DashvarError::NotAnOverlay {
            id: id.to_string(),
        })
    }

    /// Overlay draft cell of `id` when it edits `cell`.
    pub fn draft_for(&self, id: &ContextId, cell: &CellId) -> Option<&Cell> {
        self.contexts
            .get(id)
            .and_then(ContextRecord::overlay)
            .map(|draft| &draft.cell)
            .filter(|draft| &draft.id == cell)
    }

    /// The override for `(context, variable)`, created if missing.
    pub fn override_mut(
        &mut self,
        context: &ContextId,
        variable: &VariableId,
    ) -> Result<&mut VariableOverride, DashvarError> {
        self.variable(variable)?;
        let record = self.context_mut(context)?;
        Ok(record.overrides.entry(variable.clone()).or_default())
    }

    /// Record an explicit selection.
    pub fn set_explicit(
        &mut self,
        context: &ContextId,
        variable: &VariableId,
        value: impl Into<String>,
    ) -> Result<(), DashvarError> {
        let entry = self.override_mut(context, variable)?;
        entry.selected = Some(vec![value.into()]);
        entry.explicit = true;
        self.touch(context)?;
        Ok(())
    }

    /// Forget an explicit selection so the default applies again.
    pub fn clear_explicit(&mut self, context: &ContextId, variable: &VariableId) -> Result<(), DashvarError> {
        let entry = self.override_mut(context, variable)?;
        entry.selected = None;
        entry.explicit = false;
        self.touch(context)?;
        Ok(())
    }

    /// Merge a definition with a context's override.
    pub fn hydrate(
        &self,
        context: &ContextId,
        variable: &VariableId,
    ) -> Result<HydratedVariable, DashvarError> {
        let definition = self.variable(variable)?;
        let record = self.context(context)?;
        let entry = record.overrides.get(variable);

        let known_values = entry.and_then(|e| e.values.clone()).or_else(|| static_values(definition));
        let status = match entry.and_then(|e| e.status.clone()) {
            Some(status) => status,
            None if known_values.is_some() => VariableStatus::Ready,
            None => VariableStatus::Loading,
        };

        let explicit_choice = entry.filter(|e| e.explicit).and_then(|e| e.selected.as_ref()).and_then(|s| s.first());

        let (selected, explicit) = match (&known_values, explicit_choice) {
            // Explicit and still produced, or values not known yet (seeded from a URL)
            (Some(values), Some(choice)) if values.contains(choice) => (vec![choice.clone()], true),
            (None, Some(choice)) => (vec![choice.clone()], true),
            (Some(values), _) => {
                (default_selection(definition, values).map(str::to_string).into_iter().collect(), false)
            }
            (None, None) => (Vec::new(), false),
        };

        let values = known_values.unwrap_or_default();
        let status = match status {
            // Nothing to select yet
            VariableStatus::Ready if selected.is_empty() => VariableStatus::Loading,
            other => other,
        };

        Ok(HydratedVariable {
            variable: definition.clone(),
            selected,
            explicit,
            values,
            status,
        })
    }
}

//! Query result cache with in-flight deduplication.
//!
//! Entries are keyed by `(variable, context, substituted inputs)`, so a value
//! list computed for one combination of upstream selections is never served
//! for another. Each entry is in one of three states:
//!
//! - [`QueryState::Pending`] - one caller is executing; others join it
//! - [`QueryState::Ready`] - values available for every caller
//! - [`QueryState::Failed`] - negative entry, cleared by an explicit refresh
//!
//! Joiners create their `notified()` future *before* releasing the map entry,
//! so a leader finishing in between cannot be missed. A leader that is
//! cancelled or dropped removes its `Pending` entry and wakes joiners, who then
//! retry from the top.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::{ContextId, ResolveError, VariableId};

/// Identity of one query evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Variable being resolved.
    pub variable: VariableId,
    /// Context the evaluation belongs to.
    pub context: ContextId,
    /// `(name, value)` of every substituted reference, built-ins included, sorted by name.
    pub inputs: Vec<(String, String)>,
}

impl QueryKey {
    /// Build a key; `inputs` are sorted so reference order does not matter.
    pub fn new(variable: VariableId, context: ContextId, mut inputs: Vec<(String, String)>) -> Self {
        inputs.sort();
        Self {
            variable,
            context,
            inputs,
        }
    }
}

/// State of a cache entry.
#[derive(Debug, Clone)]
pub enum QueryState {
    /// Execution in progress.
    Pending(Arc<Notify>),
    /// Values produced by a successful execution.
    Ready(Arc<Vec<String>>),
    /// Terminal failure of the last execution.
    Failed(ResolveError),
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Executions started.
    pub executions: usize,
    /// Lookups answered from a `Ready` or `Failed` entry.
    pub hits: usize,
    /// Callers that waited on another caller's execution.
    pub joins: usize,
}

/// Shared query cache.
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<QueryKey, QueryState>,
    pending_timeout: Duration,
    executions: AtomicUsize,
    hits: AtomicUsize,
    joins: AtomicUsize,
}

/// Removes an unfinished `Pending` entry if the leader goes away.
struct PendingGuard<'a> {
    cache: &'a QueryCache,
    key: &'a QueryKey,
    notify: Arc<Notify>,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.entries.remove_if(self.key, |_, state| {
                matches!(state, QueryState::Pending(n) if Arc::ptr_eq(n, &self.notify))
            });
            self.notify.notify_waiters();
        }
    }
}

impl QueryCache {
    /// Create an empty cache. Joiners re-check a pending entry every `pending_timeout`.
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            pending_timeout,
            executions: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
        }
    }

    /// Return the cached values for `key`, joining or starting an execution as needed.
    ///
    /// `execute` runs at most once per call and only when this caller becomes
    /// the leader. Cancellation of `cancel` aborts both leading and joining.
    pub async fn get_or_execute<F, Fut>(
        &self,
        key: &QueryKey,
        cancel: &CancellationToken,
        execute: F,
    ) -> Result<Arc<Vec<String>>, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, ResolveError>>,
    {
        let notify = Arc::new(Notify::new());
        let mut joined = false;

        loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            match self.entries.entry(key.clone()) {
                Entry::Occupied(entry) => match entry.get() {
                    QueryState::Ready(values) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(values.clone());
                    }
                    QueryState::Failed(err) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Err(err.clone());
                    }
                    QueryState::Pending(existing) => {
                        let existing = existing.clone();
                        let notified = existing.notified();
                        drop(entry);

                        if !joined {
                            joined = true;
                            self.joins.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                target: "cache",
                                "Joining in-flight query for '{}' in {}",
                                key.variable,
                                key.context
                            );
                        }

                        tokio::select! {
                            _ = notified => continue,
                            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                            _ = tokio::time::sleep(self.pending_timeout) => {
                                tracing::warn!(
                                    target: "cache",
                                    "Still waiting for query of '{}' in {}",
                                    key.variable,
                                    key.context
                                );
                                continue;
                            }
                        }
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(QueryState::Pending(notify.clone()));
                    break;
                }
            }
        }

        let mut guard = PendingGuard {
            cache: self,
            key,
            notify: notify.clone(),
            armed: true,
        };
        self.executions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "cache", "Executing query for '{}' in {}", key.variable, key.context);

        let result = tokio::select! {
            result = execute() => result,
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        };

        match result {
            Ok(values) => {
                let values = Arc::new(values);
                self.entries.insert(key.clone(), QueryState::Ready(values.clone()));
                if cancel.is_cancelled() {
                    // Context torn down while we were storing; its eviction may already have run
                    self.entries.remove(key);
                    return Err(ResolveError::Cancelled);
                }
                guard.armed = false;
                notify.notify_waiters();
                Ok(values)
            }
            // Leave no trace; the guard removes the pending entry
            Err(ResolveError::Cancelled) => Err(ResolveError::Cancelled),
            Err(err) => {
                self.entries.insert(key.clone(), QueryState::Failed(err.clone()));
                guard.armed = false;
                notify.notify_waiters();
                Err(err)
            }
        }
    }

    /// Current state of an entry.
    pub fn get(&self, key: &QueryKey) -> Option<QueryState> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Drop negative entries of `context` so the next resolution retries them.
    pub fn clear_failures(&self, context: &ContextId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, state| !(key.context == *context && matches!(state, QueryState::Failed(_))));
        before.saturating_sub(self.entries.len())
    }

    /// Drop every settled entry of `context`.
    ///
    /// Pending entries are owned by their leaders, who clean up on cancellation.
    pub fn evict_context(&self, context: &ContextId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, state| key.context != *context || matches!(state, QueryState::Pending(_)));
        let evicted = before.saturating_sub(self.entries.len());
        tracing::debug!(target: "cache", "Evicted {evicted} entries of {context}");
        evicted
    }

    /// Copy `Ready` entries of `source` into `target`, limited to `variables`.
    pub fn clone_context<'a, I>(&self, source: &ContextId, target: &ContextId, variables: I) -> usize
    where
        I: IntoIterator<Item = &'a VariableId>,
    {
        let wanted: std::collections::HashSet<&VariableId> = variables.into_iter().collect();
        let copies: Vec<(QueryKey, QueryState)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().context == *source && wanted.contains(&entry.key().variable))
            .filter(|entry| matches!(entry.value(), QueryState::Ready(_)))
            .map(|entry| {
                let mut key = entry.key().clone();
                key.context = target.clone();
                (key, entry.value().clone())
            })
            .collect();

        let count = copies.len();
        for (key, state) in copies {
            self.entries.insert(key, state);
        }
        count
    }

    /// Number of entries in any state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            executions: self.executions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
        }
    }
}

//! Scripted query executor for tests.

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::constants::DEFAULT_VALUE_COLUMN;
use crate::core::TimeRange;
use crate::resolver::{QueryExecutor, QueryTable};

#[derive(Debug, Clone)]
enum Response {
    Values(Vec<String>),
    Error(String),
}

/// Answers queries by substring match and records every call.
///
/// The first rule whose pattern occurs in the query wins. Queries matching no
/// rule return an empty table.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    rules: Mutex<Vec<(String, Response)>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingExecutor {
    /// An executor with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer queries containing `pattern` with `values`.
    #[must_use]
    pub fn respond<I, S>(self, pattern: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_response(pattern, values);
        self
    }

    /// Fail queries containing `pattern` with `message`.
    #[must_use]
    pub fn fail(self, pattern: &str, message: &str) -> Self {
        self.set_rule(pattern, Response::Error(message.to_string()));
        self
    }

    /// Replace (or add) the answer for `pattern` on a shared executor.
    pub fn set_response<I, S>(&self, pattern: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_rule(pattern, Response::Values(values.into_iter().map(Into::into).collect()));
    }

    fn set_rule(&self, pattern: &str, response: Response) {
        let mut rules = lock(&self.rules);
        match rules.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, existing)) => *existing = response,
            None => rules.push((pattern.to_string(), response)),
        }
    }

    /// Every query received, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of queries received.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of received queries containing `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> usize {
        lock(&self.calls).iter().filter(|q| q.contains(pattern)).count()
    }

    /// Highest number of queries observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, query: &str) -> Result<QueryTable> {
        let rules = lock(&self.rules);
        match rules.iter().find(|(pattern, _)| query.contains(pattern.as_str())) {
            Some((_, Response::Values(values))) => {
                Ok(QueryTable::single_column(DEFAULT_VALUE_COLUMN, values.iter().cloned()))
            }
            Some((_, Response::Error(message))) => Err(anyhow!("{message}")),
            None => Ok(QueryTable::default()),
        }
    }
}

impl QueryExecutor for RecordingExecutor {
    fn execute<'a>(&'a self, query: &'a str, _range: &'a TimeRange) -> BoxFuture<'a, Result<QueryTable>> {
        Box::pin(async move {
            lock(&self.calls).push(query.to_string());
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let result = self.answer(query);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

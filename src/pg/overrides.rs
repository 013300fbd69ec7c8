//! Canned query results for tests
//!
//! Every query issued through an [`OverrideExecutor`] is looked up by the
//! SHA-256 of its canonical (query, args) encoding. A missing entry means
//! the test fixture is incomplete, so the executor panics with a
//! [`FixtureError`] instead of returning something plausible.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::executor::{QueryError, QueryExecutor};
use super::row::{Row, Value};

/// A query and its ordered arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideKey {
    pub query: String,
    pub args: Vec<Value>,
}

impl OverrideKey {
    pub fn new(query: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            query: query.into(),
            args,
        }
    }

    /// Hex encoded SHA-256 over the JSON encoding of query and args
    pub fn hash(&self) -> String {
        // Serializing strings and tagged enums cannot fail
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

impl fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.query)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(Value::to_string).collect();
            write!(f, " with args [{}]", args.join(", "))?;
        }
        Ok(())
    }
}

/// What a canned query returns
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideResult {
    Rows(Vec<Row>),
    Affected(u64),
    Error(String),
}

impl OverrideResult {
    /// Result of a predicate query that matched (one row)
    pub fn one_row(column: &str, value: impl Into<Value>) -> Self {
        OverrideResult::Rows(vec![Row::new().with(column, value)])
    }

    /// Result of a predicate query that matched nothing
    pub fn no_rows() -> Self {
        OverrideResult::Rows(Vec::new())
    }
}

/// Raised when a test issues a query it never registered
#[derive(Debug, Clone, thiserror::Error)]
#[error("fixture error: no override registered for {key} on {endpoint} (hash {hash})")]
pub struct FixtureError {
    pub endpoint: String,
    pub key: OverrideKey,
    pub hash: String,
}

/// Test-mode executor answering from canned results.
///
/// Each key holds a queue of results. A call consumes the front result
/// unless it is the last one, which keeps being returned. That lets a test
/// script state changes such as "table missing, then present".
pub struct OverrideExecutor {
    endpoint: String,
    overrides: DashMap<String, VecDeque<OverrideResult>>,
    calls: Mutex<Vec<OverrideKey>>,
    call_count: AtomicUsize,
}

impl OverrideExecutor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            overrides: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Register a single result for a key, replacing anything queued
    pub fn set(&self, key: OverrideKey, result: OverrideResult) -> &Self {
        self.set_sequence(key, vec![result])
    }

    /// Register results returned in order; the last one repeats
    pub fn set_sequence(&self, key: OverrideKey, results: Vec<OverrideResult>) -> &Self {
        self.overrides.insert(key.hash(), results.into());
        self
    }

    /// Number of queries issued so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Queries issued so far, in order
    pub fn calls(&self) -> Vec<OverrideKey> {
        self.calls.lock().clone()
    }

    /// Number of times `query` was issued, regardless of arguments
    pub fn calls_to(&self, query: &str) -> usize {
        self.calls.lock().iter().filter(|k| k.query == query).count()
    }

    fn lookup(&self, sql: &str, args: &[Value]) -> OverrideResult {
        let key = OverrideKey::new(sql, args.to_vec());
        let hash = key.hash();
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(key.clone());

        let result = self.overrides.get_mut(&hash).and_then(|mut queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

        match result {
            Some(result) => {
                debug!(endpoint = %self.endpoint, key = %key, "Serving override");
                result
            }
            None => {
                let err = FixtureError {
                    endpoint: self.endpoint.clone(),
                    key,
                    hash,
                };
                panic!("{}", err);
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for OverrideExecutor {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        match self.lookup(sql, args) {
            OverrideResult::Rows(rows) => Ok(rows),
            OverrideResult::Affected(_) => Ok(Vec::new()),
            OverrideResult::Error(message) => Err(QueryError::Driver(message)),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        match self.lookup(sql, args) {
            OverrideResult::Rows(rows) => Ok(rows.len() as u64),
            OverrideResult::Affected(affected) => Ok(affected),
            OverrideResult::Error(message) => Err(QueryError::Driver(message)),
        }
    }
}

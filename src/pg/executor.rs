//! Query execution boundary
//!
//! Everything that talks to a node goes through [`QueryExecutor`]. The
//! production implementation is [`super::PgExecutor`]; tests substitute
//! an override executor that answers from canned results.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::row::{Row, Value};

/// Query errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("{0}")]
    Driver(String),

    #[error("unexpected result: {0}")]
    UnexpectedShape(String),

    #[error("query cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

/// Runs parameterised queries against one node
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// host:port of the node, for logging
    fn endpoint(&self) -> &str;

    /// Run a query and return all rows
    async fn query(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, QueryError>;

    /// Run a statement and return the number of affected rows
    async fn execute(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64, QueryError>;

    /// Predicate query: true iff at least one row comes back
    async fn exists(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<bool, QueryError> {
        let rows = self.query(sql, args, cancel).await?;
        Ok(!rows.is_empty())
    }
}

/// Race `fut` against `cancel`; a fired token wins and drops the query
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    if cancel.is_cancelled() {
        return Err(QueryError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        result = fut => result,
    }
}

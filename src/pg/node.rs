//! Primary/standby classification for a single node
//!
//! The role is derived from `pg_is_in_recovery()`:
//! - primary: not in recovery (accepting writes)
//! - standby: in recovery (read-only replica)
//!
//! Both predicates are separate queries. During a promotion the two
//! answers can disagree; callers take each answer as it comes.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PoolConfig;
use crate::metrics::metrics;

use super::dsn::Dsn;
use super::executor::{QueryError, QueryExecutor};
use super::postgres::PgExecutor;

/// Returns one row on a primary, none on a standby
pub const IS_PRIMARY_QUERY: &str = "select 'primary' where not pg_is_in_recovery()";
/// Returns one row on a standby, none on a primary
pub const IS_STANDBY_QUERY: &str = "select 'standby' where pg_is_in_recovery()";

/// A configured database node and the executor used to reach it
pub struct Node {
    name: String,
    executor: Arc<dyn QueryExecutor>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("endpoint", &self.executor.endpoint())
            .finish()
    }
}

impl Node {
    pub fn new(name: impl Into<String>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }

    /// Node backed by a lazily connected PostgreSQL pool
    pub fn connect_lazy(name: impl Into<String>, dsn: Dsn, pool_config: PoolConfig) -> Self {
        Self::new(name, Arc::new(PgExecutor::new(dsn, pool_config)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        self.executor.endpoint()
    }

    pub fn executor(&self) -> &dyn QueryExecutor {
        self.executor.as_ref()
    }

    /// Check if this node is a primary
    pub async fn is_primary(&self, cancel: &CancellationToken) -> Result<bool, QueryError> {
        self.probe("primary", IS_PRIMARY_QUERY, cancel).await
    }

    /// Check if this node is a standby
    pub async fn is_standby(&self, cancel: &CancellationToken) -> Result<bool, QueryError> {
        self.probe("standby", IS_STANDBY_QUERY, cancel).await
    }

    async fn probe(
        &self,
        probe: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, QueryError> {
        let result = self.executor.exists(sql, &[], cancel).await;
        let label = match &result {
            Ok(true) => "true",
            Ok(false) => "false",
            Err(_) => "error",
        };
        metrics().record_probe(probe, label);
        debug!(node = %self.name, endpoint = %self.endpoint(), probe = probe, result = label, "Probed node");
        result
    }
}

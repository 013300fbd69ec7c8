//! Production executor backed by a per-node `deadpool-postgres` pool
//!
//! The pool is created on first use and then kept for the lifetime of the
//! process. Pool construction and connection failures are reported per
//! call; nothing here is fatal.
//!
//! A query interrupted by its cancellation token is cancelled on the server
//! and its connection is dropped instead of going back to the pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio::sync::OnceCell;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::PoolConfig;

use super::dsn::Dsn;
use super::executor::{cancellable, QueryError, QueryExecutor};
use super::row::{Row, Value};

pub struct PgExecutor {
    endpoint: String,
    dsn: Dsn,
    pool_config: PoolConfig,
    /// Created lazily on the first query
    pool: OnceCell<Pool>,
}

impl PgExecutor {
    pub fn new(dsn: Dsn, pool_config: PoolConfig) -> Self {
        Self {
            endpoint: dsn.endpoint(),
            dsn,
            pool_config,
            pool: OnceCell::new(),
        }
    }

    /// Check whether the pool has been created yet
    pub fn is_connected(&self) -> bool {
        self.pool.initialized()
    }

    /// Connections currently held by the pool, idle or in use
    pub fn pool_size(&self) -> usize {
        self.pool.get().map(|pool| pool.status().size).unwrap_or(0)
    }

    fn connect_error(&self, message: impl ToString) -> QueryError {
        QueryError::Connect {
            endpoint: self.endpoint.clone(),
            message: message.to_string(),
        }
    }

    fn build_pool(&self) -> Result<Pool, QueryError> {
        let mut pg_config: tokio_postgres::Config = self
            .dsn
            .connect_string()
            .parse()
            .map_err(|e| self.connect_error(format!("invalid connection parameters: {}", e)))?;
        let connect_timeout = self.pool_config.connect_timeout();
        pg_config.connect_timeout(connect_timeout);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

        Pool::builder(mgr)
            .max_size(self.pool_config.max_size)
            .runtime(Runtime::Tokio1)
            .create_timeout(Some(connect_timeout))
            .wait_timeout(Some(connect_timeout + Duration::from_millis(500)))
            .build()
            .map_err(|e| self.connect_error(format!("pool creation failed: {}", e)))
    }

    /// Give up on a connection whose query was interrupted.
    ///
    /// The query is cancelled on the server and the connection is detached
    /// from the pool, so a recycled connection never has a query in flight.
    fn abandon(&self, client: Object, cancel_token: CancelToken) -> QueryError {
        drop(Object::take(client));
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = cancel_token.cancel_query(NoTls).await {
                debug!(endpoint = %endpoint, error = %e, "Failed to cancel query on server");
            }
        });
        debug!(endpoint = %self.endpoint, "Query cancelled, connection discarded");
        QueryError::Cancelled
    }

    async fn client(&self) -> Result<Object, QueryError> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                debug!(endpoint = %self.endpoint, "Creating connection pool");
                self.build_pool()
            })
            .await?;

        pool.get().await.map_err(|e| {
            error!(endpoint = %self.endpoint, error = %e, "Failed to get connection");
            self.connect_error(e)
        })
    }
}

fn driver_error(e: tokio_postgres::Error) -> QueryError {
    match e.as_db_error() {
        Some(db) => QueryError::Driver(db.message().to_string()),
        None => QueryError::Driver(e.to_string()),
    }
}

fn params(args: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|a| a as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, QueryError> {
        debug!(endpoint = %self.endpoint, query = %sql, args = ?args, "Running query");
        let client = cancellable(cancel, self.client()).await?;
        let cancel_token = client.cancel_token();
        let params = params(args);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = client.query(sql, &params) => Some(result),
        };
        match result {
            Some(rows) => {
                let rows = rows.map_err(driver_error)?;
                rows.iter().map(Row::from_pg).collect()
            }
            None => Err(self.abandon(client, cancel_token)),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        args: &[Value],
        cancel: &CancellationToken,
    ) -> Result<u64, QueryError> {
        debug!(endpoint = %self.endpoint, query = %sql, args = ?args, "Running statement");
        let client = cancellable(cancel, self.client()).await?;
        let cancel_token = client.cancel_token();
        let params = params(args);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = client.execute(sql, &params) => Some(result),
        };
        match result {
            Some(affected) => affected.map_err(driver_error),
            None => Err(self.abandon(client, cancel_token)),
        }
    }
}

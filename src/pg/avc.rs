//! Availability checker (heartbeat table)
//!
//! A single-row table on the primary holds the time of the last refresh.
//! Replicas receive it through replication, so the age of the row on any
//! node shows how far that node lags behind a live primary.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dsn::quote_identifier;
use super::executor::QueryError;
use super::node::Node;
use super::row::Value;

/// Schema holding the heartbeat table
pub const AVC_SCHEMA: &str = "public";
/// Heartbeat table name
pub const AVC_TABLE: &str = "pgr66_avc";
/// Timestamp column of the heartbeat table
pub const AVC_COLUMN: &str = "pgr66_avc";

/// Returns a row iff the heartbeat table exists; args: table, schema
pub const AVC_TABLE_EXISTS_QUERY: &str = "select relname from pg_class where relname = $1 \
     and relnamespace in (select oid from pg_namespace where nspname=$2)";

/// Schema qualified, quoted table name
pub fn full_table_name() -> String {
    format!(
        "{}.{}",
        quote_identifier(AVC_SCHEMA),
        quote_identifier(AVC_TABLE)
    )
}

pub fn create_table_sql() -> String {
    format!(
        "create table {} ({} timestamp)",
        full_table_name(),
        quote_identifier(AVC_COLUMN)
    )
}

pub fn seed_table_sql() -> String {
    format!("insert into {} values(now())", full_table_name())
}

pub fn heartbeat_age_sql() -> String {
    format!(
        "select extract(epoch from (now() - {}))::float8 as duration from {}",
        quote_identifier(AVC_COLUMN),
        full_table_name()
    )
}

pub fn update_heartbeat_sql() -> String {
    format!(
        "update {} set {} = now()",
        full_table_name(),
        quote_identifier(AVC_COLUMN)
    )
}

fn table_exists_args() -> Vec<Value> {
    vec![AVC_TABLE.into(), AVC_SCHEMA.into()]
}

/// Heartbeat older than the caller's budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationExceeded {
    /// Budget in seconds
    pub limit: f64,
    /// Observed heartbeat age in seconds
    pub actual: f64,
}

impl fmt::Display for DurationExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "should have taken {:.6} sec, but actually took {:.6} sec",
            self.limit, self.actual
        )
    }
}

/// Availability check errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AvcError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("table {table} does not exist", table = full_table_name())]
    TableMissing,

    #[error("{0}")]
    DurationExceeded(DurationExceeded),

    #[error("unexpected result for {table}: {0}", table = full_table_name())]
    UnexpectedResult(String),
}

/// Outcome of a heartbeat refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatUpdate {
    Updated,
    /// Node is not a primary; nothing written
    SkippedStandby,
}

/// Heartbeat table operations against a single node
pub struct AvailabilityTracker;

impl AvailabilityTracker {
    /// Check if the heartbeat table exists on the node
    pub async fn table_exists(node: &Node, cancel: &CancellationToken) -> Result<bool, AvcError> {
        let exists = node
            .executor()
            .exists(AVC_TABLE_EXISTS_QUERY, &table_exists_args(), cancel)
            .await?;
        Ok(exists)
    }

    /// Create and seed the heartbeat table unless it already exists.
    ///
    /// Returns true if the table was created by this call.
    pub async fn create_table(node: &Node, cancel: &CancellationToken) -> Result<bool, AvcError> {
        if Self::table_exists(node, cancel).await? {
            return Ok(false);
        }

        info!(node = %node.name(), table = %full_table_name(), "Creating availability table");
        node.executor()
            .execute(&create_table_sql(), &[], cancel)
            .await?;

        let affected = node.executor().execute(&seed_table_sql(), &[], cancel).await?;
        if affected != 1 {
            return Err(AvcError::UnexpectedResult(format!(
                "seeding inserted {} rows instead of 1",
                affected
            )));
        }
        Ok(true)
    }

    /// Seconds since the last refresh, or None when the table is missing
    pub async fn heartbeat_age(
        node: &Node,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, AvcError> {
        if !Self::table_exists(node, cancel).await? {
            return Ok(None);
        }

        let rows = node
            .executor()
            .query(&heartbeat_age_sql(), &[], cancel)
            .await?;
        if rows.len() != 1 {
            return Err(AvcError::UnexpectedResult(format!(
                "expected 1 heartbeat row, got {}",
                rows.len()
            )));
        }
        let age = rows[0].get_f64("duration")?;
        debug!(node = %node.name(), age = age, "Read heartbeat age");
        Ok(Some(age))
    }

    /// Refresh the heartbeat. Only a primary writes; standbys are skipped.
    pub async fn update_duration(
        node: &Node,
        cancel: &CancellationToken,
    ) -> Result<HeartbeatUpdate, AvcError> {
        if !node.is_primary(cancel).await? {
            info!(node = %node.name(), table = %full_table_name(), "Skipping heartbeat update on a standby");
            return Ok(HeartbeatUpdate::SkippedStandby);
        }

        Self::create_table(node, cancel).await?;

        let affected = node
            .executor()
            .execute(&update_heartbeat_sql(), &[], cancel)
            .await?;
        if affected != 1 {
            return Err(AvcError::UnexpectedResult(format!(
                "updated {} rows instead of 1",
                affected
            )));
        }
        Ok(HeartbeatUpdate::Updated)
    }

    /// Compare the heartbeat age against `limit` seconds.
    ///
    /// An age equal to the limit is within budget. `None` means no limit.
    /// Returns the observed age on success.
    pub async fn check_duration(
        node: &Node,
        limit: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<f64, AvcError> {
        let age = Self::heartbeat_age(node, cancel)
            .await?
            .ok_or(AvcError::TableMissing)?;

        match limit {
            Some(limit) if age > limit => Err(AvcError::DurationExceeded(DurationExceeded {
                limit,
                actual: age,
            })),
            _ => Ok(age),
        }
    }
}

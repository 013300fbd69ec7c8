//! PostgreSQL access for the router
//!
//! This module provides:
//! - Connection parameters (`Dsn`) and SQL quoting helpers
//! - The `QueryExecutor` boundary with a pooled production executor and an
//!   override executor serving canned results in tests
//! - Primary/standby classification of a node
//! - The heartbeat table used for availability checks

mod avc;
mod dsn;
mod executor;
mod node;
#[cfg(any(test, feature = "testing"))]
mod overrides;
mod postgres;
mod row;

pub use avc::{
    create_table_sql, full_table_name, heartbeat_age_sql, seed_table_sql, update_heartbeat_sql,
    AvailabilityTracker, AvcError, DurationExceeded, HeartbeatUpdate, AVC_COLUMN, AVC_SCHEMA,
    AVC_TABLE, AVC_TABLE_EXISTS_QUERY,
};
pub use dsn::{connect_string_value, quote_identifier, Dsn, DsnError, B64_PASSWORD_KEY, PASSWORD_KEY};
pub use executor::{cancellable, QueryError, QueryExecutor};
pub use node::{Node, IS_PRIMARY_QUERY, IS_STANDBY_QUERY};
#[cfg(any(test, feature = "testing"))]
pub use overrides::{FixtureError, OverrideExecutor, OverrideKey, OverrideResult};
pub use postgres::PgExecutor;
pub use row::{Row, Value};

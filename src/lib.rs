//! pgroute66: answers routing questions about a PostgreSQL cluster
//!
//! Which nodes are primary, which are standby, and whether a node's
//! replicated heartbeat is recent enough.

pub mod api;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod pg;
pub mod registry;

//! Routing handler
//!
//! Answers the client questions (primaries, standbys, node status, node
//! availability) on top of the connection registry. Built once at startup
//! and shared with the HTTP adapter behind an `Arc`.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::metrics;
use crate::pg::{AvailabilityTracker, AvcError, HeartbeatUpdate, Node, QueryError};
use crate::registry::ConnectionRegistry;

/// Role of a single node as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Primary,
    Standby,
    /// The probe failed
    Unavailable,
    /// No node with that name is configured
    Invalid,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Primary => "primary",
            NodeStatus::Standby => "standby",
            NodeStatus::Unavailable => "unavailable",
            NodeStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an availability check
#[derive(Debug, Clone, PartialEq)]
pub enum AvailabilityStatus {
    Ok,
    /// Heartbeat older than the limit (both in seconds)
    Exceeded { limit: f64, actual: f64 },
    /// Any other failure, carrying the error text
    Unavailable(String),
    /// No node with that name is configured
    Invalid,
}

impl AvailabilityStatus {
    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            AvailabilityStatus::Ok => "ok",
            AvailabilityStatus::Exceeded { .. } => "exceeded",
            AvailabilityStatus::Unavailable(_) => "unavailable",
            AvailabilityStatus::Invalid => "invalid",
        }
    }
}

/// Wire form: `ok`, `exceeded (<limit>,<actual>)`, the error text, or `invalid`
impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityStatus::Ok => f.write_str("ok"),
            AvailabilityStatus::Exceeded { limit, actual } => {
                write!(f, "exceeded ({:.6},{:.6})", limit, actual)
            }
            AvailabilityStatus::Unavailable(message) => f.write_str(message),
            AvailabilityStatus::Invalid => f.write_str("invalid"),
        }
    }
}

/// Result of looking for the node that owns the heartbeat table
#[derive(Debug)]
pub enum PrimarySelection {
    One(Arc<Node>),
    /// Every node answered and none is primary
    None,
    /// No primary among the nodes that answered; these did not answer
    Unreachable(Vec<String>),
    /// Split brain: names of every node claiming to be primary
    Multiple(Vec<String>),
}

/// Which probe to run across a group
#[derive(Debug, Clone, Copy)]
enum Role {
    Primary,
    Standby,
}

pub struct RoutingHandler {
    registry: ConnectionRegistry,
}

impl RoutingHandler {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Primaries of `group`, sorted and deduplicated
    pub async fn get_primaries(&self, group: &str, cancel: &CancellationToken) -> Vec<String> {
        self.nodes_with_role(group, Role::Primary, cancel).await
    }

    /// Standbys of `group`, sorted and deduplicated
    pub async fn get_standbys(&self, group: &str, cancel: &CancellationToken) -> Vec<String> {
        self.nodes_with_role(group, Role::Standby, cancel).await
    }

    async fn nodes_with_role(
        &self,
        group: &str,
        role: Role,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let nodes = self.registry.group_nodes(group);
        let probes = nodes.values().map(|node| async move {
            let result = match role {
                Role::Primary => node.is_primary(cancel).await,
                Role::Standby => node.is_standby(cancel).await,
            };
            (node.name(), result)
        });

        let mut names: Vec<String> = join_all(probes)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(true) => Some(name.to_string()),
                Ok(false) => None,
                Err(e) => {
                    debug!(node = %name, role = ?role, error = %e, "Could not get state of node");
                    None
                }
            })
            .collect();

        names.sort();
        names.dedup();
        names
    }

    /// Status of a single node from one is-primary probe
    pub async fn get_node_status(&self, name: &str, cancel: &CancellationToken) -> NodeStatus {
        let Some(node) = self.registry.get(name) else {
            return NodeStatus::Invalid;
        };

        match node.is_primary(cancel).await {
            Ok(true) => NodeStatus::Primary,
            Ok(false) => NodeStatus::Standby,
            Err(e) => {
                debug!(node = %name, error = %e, "Could not get state of node");
                NodeStatus::Unavailable
            }
        }
    }

    /// Check every configured node and pick the single primary.
    ///
    /// Nodes that fail to answer are not candidates.
    pub async fn find_primary(&self, cancel: &CancellationToken) -> PrimarySelection {
        let checks = self.registry.nodes().map(|node| async move {
            let result = node.is_primary(cancel).await;
            (node, result)
        });

        let mut primaries: Vec<Arc<Node>> = Vec::new();
        let mut unreachable: Vec<String> = Vec::new();
        for (node, result) in join_all(checks).await {
            match result {
                Ok(true) => primaries.push(Arc::clone(node)),
                Ok(false) => {}
                Err(e) => {
                    if !e.is_cancelled() {
                        warn!(node = %node.name(), error = %e, "Failed to check if node is primary");
                    }
                    unreachable.push(node.name().to_string());
                }
            }
        }

        match primaries.len() {
            0 if unreachable.is_empty() => PrimarySelection::None,
            0 => PrimarySelection::Unreachable(unreachable),
            1 => PrimarySelection::One(primaries.remove(0)),
            _ => PrimarySelection::Multiple(
                primaries.iter().map(|n| n.name().to_string()).collect(),
            ),
        }
    }

    /// The primary for heartbeat maintenance, or None when the round is skipped
    async fn maintenance_primary(&self, action: &str, cancel: &CancellationToken) -> Option<Arc<Node>> {
        match self.find_primary(cancel).await {
            PrimarySelection::One(node) => Some(node),
            PrimarySelection::None => {
                warn!(action = action, "No primary found, skipping heartbeat maintenance");
                metrics().record_primary_anomaly("none");
                metrics().record_heartbeat(action, "skipped");
                None
            }
            PrimarySelection::Unreachable(names) => {
                warn!(
                    action = action,
                    unreachable = ?names,
                    "No primary among reachable nodes, skipping heartbeat maintenance"
                );
                metrics().record_primary_anomaly("unreachable");
                metrics().record_heartbeat(action, "skipped");
                None
            }
            PrimarySelection::Multiple(names) => {
                warn!(
                    action = action,
                    primaries = ?names,
                    "Several nodes claim to be primary, skipping heartbeat maintenance"
                );
                metrics().record_primary_anomaly("multiple");
                metrics().record_heartbeat(action, "skipped");
                None
            }
        }
    }

    /// Create the heartbeat table on the primary if it is missing.
    ///
    /// Returns the primary's name, or None if the round was skipped.
    pub async fn ensure_availability_table(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AvcError> {
        let Some(node) = self.maintenance_primary("create", cancel).await else {
            return Ok(None);
        };

        match AvailabilityTracker::create_table(&node, cancel).await {
            Ok(created) => {
                if created {
                    info!(node = %node.name(), "Created availability table");
                }
                metrics().record_heartbeat("create", "ok");
                Ok(Some(node.name().to_string()))
            }
            Err(e) => {
                warn!(node = %node.name(), error = %e, "Failed to create availability table");
                metrics().record_heartbeat("create", "error");
                Err(e)
            }
        }
    }

    /// Refresh the heartbeat on the primary.
    ///
    /// Returns the primary's name, or None if the round was skipped.
    pub async fn update_node_availability(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AvcError> {
        let Some(node) = self.maintenance_primary("update", cancel).await else {
            return Ok(None);
        };

        match AvailabilityTracker::update_duration(&node, cancel).await {
            Ok(HeartbeatUpdate::Updated) => {
                info!(node = %node.name(), "Updated availability info");
                metrics().record_heartbeat("update", "ok");
                Ok(Some(node.name().to_string()))
            }
            // Demoted between the selection probe and the update
            Ok(HeartbeatUpdate::SkippedStandby) => {
                metrics().record_heartbeat("update", "skipped");
                Ok(None)
            }
            Err(e) => {
                warn!(node = %node.name(), error = %e, "Failed to update availability info");
                metrics().record_heartbeat("update", "error");
                Err(e)
            }
        }
    }

    /// Availability of `name` against `limit` seconds (`None` = no limit).
    ///
    /// Every known-node check runs table maintenance before and a heartbeat
    /// refresh after, whatever the outcome. Unknown nodes issue no queries.
    pub async fn get_node_availability(
        &self,
        name: &str,
        limit: Option<f64>,
        cancel: &CancellationToken,
    ) -> AvailabilityStatus {
        let Some(node) = self.registry.get(name).cloned() else {
            metrics().record_availability("invalid");
            return AvailabilityStatus::Invalid;
        };

        // A failed maintenance pass only affects this round
        let _ = self.ensure_availability_table(cancel).await;

        let status = match AvailabilityTracker::check_duration(&node, limit, cancel).await {
            Ok(age) => {
                info!(node = %name, age = age, "Availability of node is within limits");
                AvailabilityStatus::Ok
            }
            Err(AvcError::DurationExceeded(exceeded)) => {
                info!(node = %name, error = %exceeded, "Availability limit exceeded");
                AvailabilityStatus::Exceeded {
                    limit: exceeded.limit,
                    actual: exceeded.actual,
                }
            }
            Err(e) => {
                if !matches!(e, AvcError::Query(QueryError::Cancelled)) {
                    warn!(node = %name, error = %e, "Unexpected error while retrieving availability");
                }
                AvailabilityStatus::Unavailable(e.to_string())
            }
        };

        let _ = self.update_node_availability(cancel).await;

        metrics().record_availability(status.kind());
        status
    }
}

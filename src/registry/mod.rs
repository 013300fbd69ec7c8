//! Connection registry
//!
//! Holds every configured node by name and resolves group names to node
//! subsets. The `all` group is synthesized from the node set; named groups
//! may list nodes that are not configured, which are dropped at lookup time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pg::{Dsn, DsnError, Node};

/// Reserved group name covering every configured node
pub const ALL_GROUP: &str = "all";

/// Nodes and groups, built once at startup and shared read-only
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Nodes by name
    nodes: BTreeMap<String, Arc<Node>>,
    /// Group name => node names, as configured
    groups: BTreeMap<String, Vec<String>>,
}

impl ConnectionRegistry {
    pub fn new(nodes: impl IntoIterator<Item = Node>, groups: BTreeMap<String, Vec<String>>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.name().to_string(), Arc::new(node)))
            .collect();
        Self { nodes, groups }
    }

    /// Build lazily connected nodes from configuration.
    ///
    /// Base64 passwords are decoded here, once, before any connection is made.
    pub fn from_config(config: &Config) -> Result<Self, DsnError> {
        let nodes: Vec<Node> = decoded_hosts(config)?
            .into_iter()
            .map(|(name, dsn)| {
                info!(node = %name, endpoint = %dsn.endpoint(), "Registered node");
                Node::connect_lazy(name, dsn, config.pool.clone())
            })
            .collect();

        for (group, members) in &config.groups {
            for member in members.iter().filter(|m| !config.hosts.contains_key(*m)) {
                debug!(group = %group, node = %member, "Group references an unconfigured node");
            }
        }

        Ok(Self::new(nodes, config.groups.clone()))
    }

    /// Nodes named in `names` that exist in the registry.
    ///
    /// Unknown names are dropped; duplicates and input order have no effect.
    pub fn filtered_connections(&self, names: &[String]) -> BTreeMap<String, Arc<Node>> {
        names
            .iter()
            .filter_map(|name| {
                self.nodes
                    .get(name)
                    .map(|node| (name.clone(), Arc::clone(node)))
            })
            .collect()
    }

    /// Node names belonging to `group`.
    ///
    /// `all` yields every configured node. An undefined group yields nothing.
    pub fn group_hosts(&self, group: &str) -> Vec<String> {
        if group == ALL_GROUP {
            return self.names();
        }
        match self.groups.get(group) {
            Some(members) => members
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => {
                warn!(group = %group, "Requested group is not defined");
                Vec::new()
            }
        }
    }

    /// Existing nodes of `group`
    pub fn group_nodes(&self, group: &str) -> BTreeMap<String, Arc<Node>> {
        self.filtered_connections(&self.group_hosts(group))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// All node names in ascending order
    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Every node, in name order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Connection parameters of every configured node, passwords decoded.
///
/// The configuration itself keeps the encoded form.
pub fn decoded_hosts(config: &Config) -> Result<BTreeMap<String, Dsn>, DsnError> {
    config
        .hosts
        .iter()
        .map(|(name, dsn)| {
            let mut dsn = dsn.clone();
            dsn.decode_password()?;
            Ok((name.clone(), dsn))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::{OverrideExecutor, B64_PASSWORD_KEY, PASSWORD_KEY};

    fn mock_registry(names: &[&str], groups: &[(&str, &[&str])]) -> ConnectionRegistry {
        let nodes = names.iter().map(|name| {
            Node::new(
                *name,
                Arc::new(OverrideExecutor::new(format!("{}:5432", name))),
            )
        });
        let groups = groups
            .iter()
            .map(|(group, members)| {
                (
                    group.to_string(),
                    members.iter().map(|m| m.to_string()).collect(),
                )
            })
            .collect();
        ConnectionRegistry::new(nodes, groups)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filtered_connections_drops_unknown() {
        let all: Vec<String> = (0..10).map(|i| format!("host{}", i)).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let registry = mock_registry(&refs, &[]);

        let filtered = registry.filtered_connections(&names(&["host3", "host7", "host99"]));
        assert_eq!(
            filtered.keys().cloned().collect::<Vec<_>>(),
            names(&["host3", "host7"])
        );
    }

    #[test]
    fn test_filtered_connections_ignores_order_and_duplicates() {
        let registry = mock_registry(&["a", "b", "c"], &[]);
        let forward = registry.filtered_connections(&names(&["a", "c"]));
        let backward = registry.filtered_connections(&names(&["c", "a", "c", "a"]));
        assert_eq!(
            forward.keys().collect::<Vec<_>>(),
            backward.keys().collect::<Vec<_>>()
        );
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn test_filtered_connections_empty_input() {
        let registry = mock_registry(&["a"], &[]);
        assert!(registry.filtered_connections(&[]).is_empty());
    }

    #[test]
    fn test_all_group_is_every_node() {
        let registry = mock_registry(&["c", "a", "b"], &[("all", &["a"])]);
        assert_eq!(registry.group_hosts(ALL_GROUP), names(&["a", "b", "c"]));
    }

    #[test]
    fn test_named_group_keeps_stale_members() {
        let registry = mock_registry(&["a", "b"], &[("g1", &["b", "gone", "b"])]);
        assert_eq!(registry.group_hosts("g1"), names(&["b", "gone"]));
        let nodes = registry.group_nodes("g1");
        assert_eq!(nodes.keys().cloned().collect::<Vec<_>>(), names(&["b"]));
    }

    #[test]
    fn test_unknown_group_is_empty() {
        let registry = mock_registry(&["a"], &[("g1", &["a"])]);
        assert!(registry.group_hosts("nope").is_empty());
        assert!(registry.group_nodes("nope").is_empty());
    }

    #[test]
    fn test_from_config_decodes_passwords() {
        let toml_str = r#"
[hosts.host1]
host = "pg-1"
port = 5432
b64password = "c2VjcmV0"

[hosts.host2]
host = "pg-2"

[groups]
pair = ["host1", "host2", "host3"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let registry = ConnectionRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("host1"));
        assert_eq!(registry.get("host1").unwrap().endpoint(), "pg-1:5432");
        assert_eq!(registry.group_nodes("pair").len(), 2);

        let hosts = decoded_hosts(&config).unwrap();
        assert_eq!(hosts["host1"].get(PASSWORD_KEY), Some("secret"));
        assert_eq!(hosts["host1"].get(B64_PASSWORD_KEY), None);
        assert_eq!(hosts["host2"].get(PASSWORD_KEY), None);
        assert!(!hosts["host1"].connect_string().contains("c2VjcmV0"));

        // The configuration keeps the encoded form
        assert_eq!(config.hosts["host1"].get(B64_PASSWORD_KEY), Some("c2VjcmV0"));
        assert_eq!(config.hosts["host1"].get(PASSWORD_KEY), None);
    }

    #[test]
    fn test_from_config_rejects_bad_base64() {
        let toml_str = r#"
[hosts.host1]
host = "pg-1"
b64password = "not base64!"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            ConnectionRegistry::from_config(&config),
            Err(DsnError::InvalidBase64 { .. })
        ));
    }
}

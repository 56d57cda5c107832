//! Node registry: maps node ids to peer guard endpoints.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use snapconf::ClusterConfig;
use snapstore::NodeId;

use crate::error::{GuardError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the peer's network channel.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn parse(entry: &str) -> Option<Self> {
        let (host, port) = entry.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Read-only after construction; shared without locking.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    table: HashMap<NodeId, Endpoint>,
    rule: Option<AddressRule>,
}

#[derive(Debug, Clone)]
struct AddressRule {
    prefix: String,
    offset: u32,
    port: u16,
}

impl AddressRule {
    fn resolve(&self, node_id: NodeId) -> Option<Endpoint> {
        let last = node_id.checked_add(self.offset)?;
        if last > 254 {
            return None;
        }

        let host = format!("{}{}", self.prefix, last);
        // A dotted-quad prefix must still produce a valid IPv4 address
        if self.prefix.ends_with('.') && host.parse::<Ipv4Addr>().is_err() {
            return None;
        }
        Some(Endpoint::new(host, self.port))
    }
}

impl NodeRegistry {
    /// Build from cluster config. Malformed table entries are rejected.
    pub fn from_config(cluster: &ClusterConfig) -> anyhow::Result<Self> {
        let mut table = HashMap::new();
        for (key, value) in &cluster.nodes {
            let node_id: NodeId = key
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid node id in [cluster.nodes]: {}", key))?;
            let endpoint = Endpoint::parse(value).ok_or_else(|| {
                anyhow::anyhow!("invalid endpoint for node {}: {} (expected host:port)", key, value)
            })?;
            table.insert(node_id, endpoint);
        }

        let rule = cluster.derive_addresses.then(|| AddressRule {
            prefix: cluster.address_prefix.clone(),
            offset: cluster.address_offset,
            port: cluster.port,
        });

        Ok(Self { table, rule })
    }

    /// A registry with only explicit entries.
    pub fn from_table(entries: impl IntoIterator<Item = (NodeId, Endpoint)>) -> Self {
        Self {
            table: entries.into_iter().collect(),
            rule: None,
        }
    }

    pub fn resolve(&self, node_id: NodeId) -> Result<Endpoint> {
        if let Some(endpoint) = self.table.get(&node_id) {
            return Ok(endpoint.clone());
        }

        self.rule
            .as_ref()
            .and_then(|rule| rule.resolve(node_id))
            .ok_or(GuardError::UnknownNode(node_id))
    }
}

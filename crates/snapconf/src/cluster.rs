//! Cluster addressing and peer-channel security.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How node ids map to peer guard endpoints.
///
/// Explicit `nodes` entries win. Otherwise the address is
/// `{address_prefix}{node_id + address_offset}` on `port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Default: "10.22.1."
    pub address_prefix: String,

    /// Added to the node id to form the last address component.
    /// Default: 1
    pub address_offset: u32,

    /// Peer guard HTTP port.
    /// Default: 12345
    pub port: u16,

    /// When false, only ids listed in `nodes` resolve.
    /// Default: true
    pub derive_addresses: bool,

    /// Timeout for forwarding a command to a peer.
    /// Default: 5000
    pub forward_timeout_ms: u64,

    /// Explicit `node_id = "host:port"` entries.
    pub nodes: BTreeMap<String, String>,
}

impl ClusterConfig {
    /// Look up an explicit table entry for a node.
    pub fn node_entry(&self, node_id: u32) -> Option<&str> {
        self.nodes.get(&node_id.to_string()).map(String::as_str)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address_prefix: "10.22.1.".to_string(),
            address_offset: 1,
            port: 12345,
            derive_addresses: true,
            forward_timeout_ms: 5000,
            nodes: BTreeMap::new(),
        }
    }
}

/// Shared-token check on the network channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// When set, peers must present this token. Unset means open access.
    pub token: Option<String>,
}

impl SecurityConfig {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

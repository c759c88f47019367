//! Service-node descriptors.
//!
//! A [`ServiceNode`] is an immutable value describing one storage node:
//! where to reach it and the two public keys it operates under. Identity is
//! the network address alone; a node that rotates its keys is still the same
//! pool entry.

use serde::{Deserialize, Serialize};

/// One service node in the storage network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Public IPv4 address.
    pub ip: String,
    /// Storage RPC / onion entry port.
    pub port: u16,
    /// Ed25519 public key, hex-encoded (64 chars). Signs swarm responses.
    pub ed25519_pub_hex: String,
    /// X25519 public key, hex-encoded (64 chars). Onion layer key exchange.
    pub x25519_pub_hex: String,
}

impl PartialEq for ServiceNode {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for ServiceNode {}

impl std::hash::Hash for ServiceNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl ServiceNode {
    /// Base HTTPS URL for direct (non-onion) requests to this node.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.ip, self.port)
    }

    /// URL of the onion-request entry endpoint.
    pub fn onion_url(&self) -> String {
        format!("{}/onion_req/v2", self.base_url())
    }

    /// URL of the direct storage RPC endpoint.
    pub fn storage_rpc_url(&self) -> String {
        format!("{}/storage_rpc/v1", self.base_url())
    }

    /// URL of the stats endpoint used for guard version testing.
    pub fn stats_url(&self) -> String {
        format!("{}/get_stats/v1", self.base_url())
    }
}

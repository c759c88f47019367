//! Onion request destinations.
//!
//! The exit hop forwards the innermost payload either to another service
//! node (storage RPC) or to an external HTTPS server (community servers,
//! file servers). Server destinations carry a target version: v3 responses
//! are JSON, v4 responses are bencoded.

use serde::{Deserialize, Serialize};
use veil_types::ServiceNode;

/// Response framing spoken by a server destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerVersion {
    /// JSON body inside a JSON envelope.
    V3,
    /// Bencoded `(info, body)` frame.
    V4,
}

/// Where the exit hop delivers the innermost payload.
#[derive(Clone, Debug, PartialEq)]
pub enum OnionDestination {
    /// A service node, addressed by its Ed25519 key.
    Snode(ServiceNode),
    /// An external HTTPS server.
    Server {
        host: String,
        /// Request path on the server, e.g. `/veil/v4/lsrpc`.
        target: String,
        /// The server's X25519 public key, hex-encoded.
        x25519_pub_hex: String,
        scheme: String,
        port: u16,
        version: ServerVersion,
    },
}

impl OnionDestination {
    /// The X25519 key the innermost layer is encrypted to.
    pub fn x25519_pub_hex(&self) -> &str {
        match self {
            OnionDestination::Snode(node) => &node.x25519_pub_hex,
            OnionDestination::Server { x25519_pub_hex, .. } => x25519_pub_hex,
        }
    }

    /// The service node, when this destination is one.
    pub fn snode(&self) -> Option<&ServiceNode> {
        match self {
            OnionDestination::Snode(node) => Some(node),
            OnionDestination::Server { .. } => None,
        }
    }

    /// Routing metadata describing this destination, embedded in the layer
    /// addressed to the exit hop.
    pub fn routing_descriptor(&self) -> serde_json::Value {
        match self {
            OnionDestination::Snode(node) => serde_json::json!({
                "destination": node.ed25519_pub_hex,
            }),
            OnionDestination::Server {
                host,
                target,
                scheme,
                port,
                ..
            } => serde_json::json!({
                "host": host,
                "target": target,
                "method": "POST",
                "protocol": scheme,
                "port": port,
            }),
        }
    }

    /// Whether responses from this destination use the v4 bencoded frame.
    pub fn is_v4(&self) -> bool {
        matches!(
            self,
            OnionDestination::Server {
                version: ServerVersion::V4,
                ..
            }
        )
    }
}

impl std::fmt::Display for OnionDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnionDestination::Snode(node) => write!(f, "snode {node}"),
            OnionDestination::Server {
                scheme, host, port, ..
            } => write!(f, "server {scheme}://{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snode() -> ServiceNode {
        ServiceNode {
            ip: "1.2.3.4".to_string(),
            port: 22021,
            ed25519_pub_hex: "ab".repeat(32),
            x25519_pub_hex: "cd".repeat(32),
        }
    }

    #[test]
    fn test_snode_descriptor() {
        let dest = OnionDestination::Snode(snode());
        let descriptor = dest.routing_descriptor();
        assert_eq!(descriptor["destination"], "ab".repeat(32));
        assert_eq!(dest.x25519_pub_hex(), "cd".repeat(32));
        assert!(!dest.is_v4());
    }

    #[test]
    fn test_server_descriptor() {
        let dest = OnionDestination::Server {
            host: "open.example.org".to_string(),
            target: "/veil/v4/lsrpc".to_string(),
            x25519_pub_hex: "ef".repeat(32),
            scheme: "https".to_string(),
            port: 443,
            version: ServerVersion::V4,
        };
        let descriptor = dest.routing_descriptor();
        assert_eq!(descriptor["host"], "open.example.org");
        assert_eq!(descriptor["method"], "POST");
        assert_eq!(descriptor["port"], 443);
        assert!(dest.is_v4());
    }
}

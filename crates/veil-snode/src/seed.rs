//! Seed-node bootstrap.
//!
//! When no usable pool is cached the client falls back to a direct HTTPS
//! JSON-RPC call against one of the compiled-in seed nodes. This and guard
//! version testing are the only non-onion network calls the core makes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use veil_types::{Network, ServiceNode};

use crate::{Result, SnodeError, POOL_CAP};

/// Attempts per seed node before moving to the next one.
const ATTEMPTS_PER_SEED: u32 = 2;

#[derive(Serialize)]
struct SeedRpcRequest {
    method: &'static str,
    params: SeedRpcParams,
}

#[derive(Serialize)]
struct SeedRpcParams {
    active_only: bool,
    limit: usize,
    fields: SeedRpcFields,
}

#[derive(Serialize)]
struct SeedRpcFields {
    public_ip: bool,
    storage_port: bool,
    pubkey_ed25519: bool,
    pubkey_x25519: bool,
}

#[derive(Deserialize)]
struct SeedRpcResponse {
    result: SeedRpcResult,
}

#[derive(Deserialize)]
struct SeedRpcResult {
    service_node_states: Vec<SeedNodeState>,
}

#[derive(Deserialize)]
struct SeedNodeState {
    public_ip: Option<String>,
    storage_port: Option<u16>,
    pubkey_ed25519: Option<String>,
    pubkey_x25519: Option<String>,
}

fn request_body() -> SeedRpcRequest {
    SeedRpcRequest {
        method: "get_n_service_nodes",
        params: SeedRpcParams {
            active_only: true,
            limit: POOL_CAP,
            fields: SeedRpcFields {
                public_ip: true,
                storage_port: true,
                pubkey_ed25519: true,
                pubkey_x25519: true,
            },
        },
    }
}

/// Parse a seed (or peer) node-list response into service nodes, skipping
/// malformed entries.
pub fn parse_node_states(states: Vec<serde_json::Value>) -> Vec<ServiceNode> {
    states
        .into_iter()
        .filter_map(|value| {
            let state: SeedNodeState = match serde_json::from_value(value) {
                Ok(state) => state,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed node descriptor");
                    return None;
                }
            };
            node_from_state(state)
        })
        .collect()
}

fn node_from_state(state: SeedNodeState) -> Option<ServiceNode> {
    let ip = state.public_ip?;
    if ip.is_empty() || ip == "0.0.0.0" {
        return None;
    }
    Some(ServiceNode {
        ip,
        port: state.storage_port?,
        ed25519_pub_hex: state.pubkey_ed25519?,
        x25519_pub_hex: state.pubkey_x25519?,
    })
}

/// Fetch the service-node list from a seed node.
///
/// Tries each seed of the given network, with [`ATTEMPTS_PER_SEED`] attempts
/// per seed. Fails with [`SnodeError::PoolUpdatingFailed`] when every seed is
/// exhausted.
pub async fn fetch_service_nodes(
    http: &reqwest::Client,
    network: Network,
) -> Result<Vec<ServiceNode>> {
    let body = request_body();
    let mut last_error = String::from("no seed nodes configured");

    for seed in network.seed_urls() {
        for attempt in 1..=ATTEMPTS_PER_SEED {
            debug!(seed, attempt, "Contacting seed node");
            match fetch_from_seed(http, seed, &body).await {
                Ok(nodes) if !nodes.is_empty() => {
                    debug!(seed, count = nodes.len(), "Seed node returned pool");
                    return Ok(nodes);
                }
                Ok(_) => {
                    last_error = format!("seed {seed} returned an empty node list");
                    warn!(seed, attempt, "Seed node returned no nodes");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(seed, attempt, error = %e, "Seed node request failed");
                }
            }
        }
    }

    Err(SnodeError::PoolUpdatingFailed(last_error))
}

async fn fetch_from_seed(
    http: &reqwest::Client,
    seed: &str,
    body: &SeedRpcRequest,
) -> Result<Vec<ServiceNode>> {
    let url = format!("{seed}/json_rpc");
    let response = http
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| SnodeError::PoolUpdatingFailed(e.to_string()))?;

    let parsed: SeedRpcResponse = response
        .json()
        .await
        .map_err(|e| SnodeError::PoolUpdatingFailed(e.to_string()))?;

    Ok(parsed
        .result
        .service_node_states
        .into_iter()
        .filter_map(node_from_state)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(request_body()).expect("serialize");
        assert_eq!(body["method"], "get_n_service_nodes");
        assert_eq!(body["params"]["active_only"], true);
        assert_eq!(body["params"]["limit"], 256);
        assert_eq!(body["params"]["fields"]["pubkey_x25519"], true);
    }

    #[test]
    fn test_parse_node_states_skips_malformed() {
        let states = vec![
            serde_json::json!({
                "public_ip": "1.2.3.4",
                "storage_port": 22021,
                "pubkey_ed25519": "aa".repeat(32),
                "pubkey_x25519": "bb".repeat(32),
            }),
            // Unroutable placeholder address.
            serde_json::json!({
                "public_ip": "0.0.0.0",
                "storage_port": 22021,
                "pubkey_ed25519": "cc".repeat(32),
                "pubkey_x25519": "dd".repeat(32),
            }),
            // Missing keys.
            serde_json::json!({ "public_ip": "5.6.7.8" }),
        ];

        let nodes = parse_node_states(states);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].ip, "1.2.3.4");
    }
}

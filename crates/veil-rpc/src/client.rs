//! Glue between the typed RPCs and the onion transport.
//!
//! [`SnodeClient`] serializes [`SignedRequest`]s into onion payloads, routes
//! them to snode destinations, and implements the discovery layer's
//! transport seam so pool refreshes and swarm fetches travel through onions
//! like everything else.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use veil_onion::{OnionDestination, OnionError, OnionTransport};
use veil_snode::{DirectoryTransport, SnodeDirectory, SnodeError};
use veil_types::ServiceNode;

use crate::request::{self, SignedRequest};
use crate::{ons, Result, RpcError};

/// Sends storage RPCs to service nodes through the onion transport.
pub struct SnodeClient {
    onion: Arc<OnionTransport>,
}

impl SnodeClient {
    pub fn new(onion: Arc<OnionTransport>) -> Self {
        Self { onion }
    }

    /// The underlying onion transport.
    pub fn onion(&self) -> &Arc<OnionTransport> {
        &self.onion
    }

    /// Send one storage RPC to a node, returning the raw response body.
    pub async fn send(&self, node: &ServiceNode, request: &SignedRequest) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(&request.to_body())
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        let destination = OnionDestination::Snode(node.clone());
        let response = self.onion.send(&destination, &payload).await?;
        Ok(response.body)
    }

    /// Send one storage RPC and parse the body as JSON.
    pub async fn send_json(
        &self,
        node: &ServiceNode,
        request: &SignedRequest,
    ) -> Result<serde_json::Value> {
        let body = self.send(node, request).await?;
        serde_json::from_slice(&body).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// Resolve a name to a session id.
    ///
    /// Issues the oracle query against three distinct random pool members;
    /// every answer must decrypt to the same session id.
    pub async fn resolve_name(
        &self,
        directory: &SnodeDirectory,
        name: &str,
    ) -> Result<String> {
        let request = ons::resolve_request(name);
        let mut used: HashSet<ServiceNode> = HashSet::new();
        let mut results = Vec::with_capacity(ons::RESOLUTION_QUERIES);

        for _ in 0..ons::RESOLUTION_QUERIES {
            let node = directory.random_node(&used).ok_or(RpcError::Snode(
                SnodeError::InsufficientSnodes {
                    need: ons::RESOLUTION_QUERIES,
                    have: used.len(),
                },
            ))?;
            used.insert(node.clone());

            let body = self.send_json(&node, &request).await?;
            let record = ons::parse_record(&body)?;
            results.push(ons::decrypt_record(name, &record)?);
        }

        ons::combine_results(&results)
    }

    /// React to a 421 "wrong swarm" response: adopt the authoritative member
    /// list when the body carries one, otherwise forget the cached swarm.
    /// Returns whether a replacement list was adopted.
    pub async fn handle_wrong_swarm(
        &self,
        directory: &SnodeDirectory,
        recipient: &str,
        body: &[u8],
    ) -> Result<bool> {
        let nodes = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .as_ref()
            .map(parse_snode_list)
            .unwrap_or_default();

        if nodes.is_empty() {
            debug!(recipient, "421 without snode list, invalidating swarm");
            directory.invalidate_swarm(recipient).await?;
            Ok(false)
        } else {
            debug!(recipient, members = nodes.len(), "421 delivered new swarm");
            directory
                .store_swarm(recipient, &nodes.into_iter().collect())
                .await?;
            Ok(true)
        }
    }
}

/// Parse a `{"snodes": [...]}` member list as returned by `get_swarm` and
/// 421 bodies. Entries missing fields are skipped.
pub fn parse_snode_list(body: &serde_json::Value) -> Vec<ServiceNode> {
    let entries = body
        .get("snodes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| {
            let ip = entry.get("ip").and_then(|v| v.as_str())?;
            if ip.is_empty() || ip == "0.0.0.0" {
                return None;
            }
            let port = match entry.get("port") {
                Some(serde_json::Value::Number(n)) => n.as_u64()? as u16,
                Some(serde_json::Value::String(s)) => s.parse().ok()?,
                _ => return None,
            };
            Some(ServiceNode {
                ip: ip.to_string(),
                port,
                ed25519_pub_hex: entry.get("pubkey_ed25519")?.as_str()?.to_string(),
                x25519_pub_hex: entry.get("pubkey_x25519")?.as_str()?.to_string(),
            })
        })
        .collect()
}

impl DirectoryTransport for SnodeClient {
    async fn get_service_nodes(
        &self,
        node: &ServiceNode,
        limit: usize,
    ) -> std::result::Result<Vec<ServiceNode>, String> {
        let request = request::oxend_request(
            "get_service_nodes",
            serde_json::json!({
                "active_only": true,
                "limit": limit,
                "fields": {
                    "public_ip": true,
                    "storage_port": true,
                    "pubkey_ed25519": true,
                    "pubkey_x25519": true,
                },
            }),
        );
        let body = self
            .send_json(node, &request)
            .await
            .map_err(|e| e.to_string())?;
        let states = body
            .pointer("/result/service_node_states")
            .or_else(|| body.get("service_node_states"))
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| "missing service_node_states".to_string())?;
        Ok(veil_snode::seed::parse_node_states(states))
    }

    async fn get_swarm(
        &self,
        node: &ServiceNode,
        recipient: &str,
    ) -> std::result::Result<Vec<ServiceNode>, String> {
        let request = request::get_swarm(recipient);
        let body = self
            .send_json(node, &request)
            .await
            .map_err(|e| e.to_string())?;
        let nodes = parse_snode_list(&body);
        if nodes.is_empty() {
            return Err(format!("empty swarm for {recipient}"));
        }
        Ok(nodes)
    }
}

/// Classify an onion error the way job executors need: retryable clock
/// drift, fatal signature failure, or a wrong-swarm redirect carrying the
/// 421 body.
pub fn wrong_swarm_body(error: &RpcError) -> Option<Vec<u8>> {
    if let RpcError::Onion(OnionError::HttpRequestFailedAtDestination {
        status: 421, body, ..
    }) = error
    {
        Some(body.clone().into_bytes())
    } else {
        None
    }
}

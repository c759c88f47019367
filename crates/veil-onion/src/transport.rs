//! Onion request sending and failure attribution.
//!
//! A request is layered through a path from [`PathManager`], POSTed to the
//! guard's `/onion_req/v2` endpoint, and the layered response is opened with
//! the innermost key. Failures are attributed as precisely as the error
//! allows:
//!
//! - a client-side timeout blames nobody (not a routing failure);
//! - a body of the form `Next node not found: <ed25519 hex>` blames exactly
//!   that hop;
//! - destination statuses 500/502/503 blame the destination snode;
//! - anything else blames the whole path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use veil_db::{queries, SharedDb};
use veil_types::NetworkClock;

use crate::destination::OnionDestination;
use crate::envelope::build_onion;
use crate::path::{OnionPath, PathManager};
use crate::response::{decode_v3, decode_v4, map_status, DestinationResponse};
use crate::{
    OnionError, Result, DEFAULT_TIMEOUT_SECS, MAX_REQUEST_SIZE, REQUEST_SIZE_WARN_FRACTION,
};

/// A successfully decoded destination response.
#[derive(Clone, Debug)]
pub struct OnionResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Option<serde_json::Value>,
}

/// Sends layered requests through onion paths.
pub struct OnionTransport {
    http: reqwest::Client,
    paths: Arc<PathManager>,
    clock: Arc<NetworkClock>,
    db: SharedDb,
    timeout: Duration,
}

/// The hop an error body singles out, when it names one.
pub fn next_node_not_found(body: &str) -> Option<String> {
    // The guard may wrap the relay error in a JSON envelope.
    let text = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("result").and_then(|r| r.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    let rest = text.strip_prefix("Next node not found: ")?;
    let hex_part: String = rest
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    if hex_part.len() == 64 {
        Some(hex_part)
    } else {
        None
    }
}

impl OnionTransport {
    pub fn new(
        http: reqwest::Client,
        paths: Arc<PathManager>,
        clock: Arc<NetworkClock>,
        db: SharedDb,
    ) -> Self {
        Self {
            http,
            paths,
            clock,
            db,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the default per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The network clock this transport keeps adjusted.
    pub fn clock(&self) -> &Arc<NetworkClock> {
        &self.clock
    }

    /// The path manager backing this transport.
    pub fn paths(&self) -> &Arc<PathManager> {
        &self.paths
    }

    /// Send `payload` to `destination` with the default deadline.
    pub async fn send(
        &self,
        destination: &OnionDestination,
        payload: &[u8],
    ) -> Result<OnionResponse> {
        self.send_with_timeout(destination, payload, self.timeout).await
    }

    /// Send `payload` to `destination` with an explicit deadline.
    pub async fn send_with_timeout(
        &self,
        destination: &OnionDestination,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<OnionResponse> {
        let path = Arc::clone(&self.paths).get_path(destination.snode()).await?;
        let onion = build_onion(path.hops(), destination, payload)?;

        if onion.body.len() > MAX_REQUEST_SIZE {
            return Err(OnionError::RequestTooLarge(onion.body.len()));
        }
        if onion.body.len() as f64 >= MAX_REQUEST_SIZE as f64 * REQUEST_SIZE_WARN_FRACTION {
            warn!(
                size = onion.body.len(),
                limit = MAX_REQUEST_SIZE,
                "Onion request close to the size limit"
            );
        }

        let guard = path.guard();
        debug!(guard = %guard, destination = %destination, "Sending onion request");

        let response = match self
            .http
            .post(guard.onion_url())
            .header("content-type", "application/json")
            .body(onion.body)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(OnionError::Timeout),
            Err(e) => {
                self.paths.record_failure(&path).await?;
                return Err(OnionError::HttpRequestFailed {
                    status: 0,
                    body: e.to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        let raw = response
            .bytes()
            .await
            .map_err(|e| OnionError::InvalidResponse(e.to_string()))?;

        if !(200..300).contains(&status) {
            let body = String::from_utf8_lossy(&raw).into_owned();
            self.attribute_failure(&path, &body).await?;
            return Err(OnionError::HttpRequestFailed { status, body });
        }

        let decoded = if destination.is_v4() {
            decode_v4(&raw, &onion.destination_key)
        } else {
            decode_v3(&raw, &onion.destination_key)
        };
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(OnionError::DecryptionFailed) => {
                self.paths.record_failure(&path).await?;
                return Err(OnionError::DecryptionFailed);
            }
            Err(other) => return Err(other),
        };

        self.absorb_metadata(&decoded).await?;

        if let OnionDestination::Snode(node) = destination {
            if matches!(decoded.status, 500 | 502 | 503) {
                self.paths.record_node_failure(node).await?;
            }
        }

        let mapped = map_status(decoded, &destination.to_string())?;
        Ok(OnionResponse {
            status: mapped.status,
            body: mapped.body,
            headers: mapped.headers,
        })
    }

    /// Blame the hop an error body names, or the whole path otherwise.
    async fn attribute_failure(&self, path: &OnionPath, body: &str) -> Result<()> {
        if let Some(ed25519_hex) = next_node_not_found(body) {
            if let Some(hop) = path.hop_by_ed25519(&ed25519_hex) {
                debug!(hop = %hop, "Relay reported unreachable next hop");
                let hop = hop.clone();
                self.paths.record_node_failure(&hop).await?;
                return Ok(());
            }
        }
        self.paths.record_failure(path).await
    }

    /// Pull the clock timestamp and fork versions out of a response.
    async fn absorb_metadata(&self, response: &DestinationResponse) -> Result<()> {
        if let Some(t) = response.timestamp_ms {
            self.clock.update_from_server(t);
        }
        if let Some((hf, sf)) = response.fork_versions {
            let conn = self.db.lock().await;
            queries::settings::update_fork_versions(&conn, hf, sf)?;
        }
        Ok(())
    }

    /// Direct (non-onion) storage RPC, used only when onion requests are
    /// disabled.
    pub async fn direct_storage_rpc(
        &self,
        node: &veil_types::ServiceNode,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "method": method, "params": params });
        let response = self
            .http
            .post(node.storage_rpc_url())
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OnionError::Timeout
                } else {
                    OnionError::HttpRequestFailed {
                        status: 0,
                        body: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OnionError::InvalidJson(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(OnionError::HttpRequestFailed {
                status,
                body: value.to_string(),
            });
        }
        Ok(value)
    }
}

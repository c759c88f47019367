//! Multi-namespace message polling.
//!
//! One poll request batches a signed `retrieve` per namespace against a
//! single swarm node, optionally refreshing the TTL of known message hashes
//! in the same batch. The last-seen hash per `(recipient, namespace, node)`
//! is tracked durably so the node only returns newer messages; a stored
//! hash whose server expiry has passed is pruned before use, because the
//! node no longer knows it.

use base64::Engine;
use tracing::debug;
use veil_db::queries::messages::{self, ReceivedMessageInfo};
use veil_db::SharedDb;
use veil_types::{Namespace, NetworkClock, ServiceNode};

use crate::auth::ClientIdentity;
use crate::batch::{self, SubResponse};
use crate::request::{ExpireMode, SignedRequest, StorageRequests};
use crate::{Result, RpcError};

/// Server-side message retention; messages with no explicit expiry are
/// assumed to live this long. Must track the server's retention window.
pub const DEFAULT_EXPIRY_MS: i64 = 15 * 24 * 60 * 60 * 1000;

/// Byte budget one poll request spreads across its namespaces.
pub const POLL_SIZE_BUDGET: i64 = 7_500_000;

/// One message returned by a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub hash: String,
    pub data: Vec<u8>,
    pub expires_at_ms: i64,
}

/// The per-namespace inputs a poll request was built with.
#[derive(Clone, Debug)]
pub struct NamespacePollState {
    pub namespace: Namespace,
    /// The `last_hash` sent to the node, if any was stored.
    pub last_hash: Option<String>,
}

/// A poll request plus the state needed to interpret its response.
#[derive(Debug)]
pub struct PollRequest {
    pub request: SignedRequest,
    pub states: Vec<NamespacePollState>,
}

/// The per-namespace outcome of a poll.
#[derive(Clone, Debug)]
pub struct NamespacePollResult {
    pub namespace: Namespace,
    /// The `last_hash` the request carried.
    pub last_hash_used: Option<String>,
    pub messages: Vec<ReceivedMessage>,
}

/// Builds poll requests and folds their responses into durable state.
pub struct Poller {
    db: SharedDb,
}

impl Poller {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Build a batched poll for `namespaces` against one swarm node.
    ///
    /// `refresh_hashes` (with `refresh_ttl_ms`) appends an extend-expiry
    /// sub-request so delivery and TTL refresh share one onion round trip.
    pub async fn build_request(
        &self,
        identity: &ClientIdentity,
        clock: &NetworkClock,
        recipient: &str,
        snode: &ServiceNode,
        namespaces: &[Namespace],
        refresh_hashes: &[String],
        refresh_ttl_ms: Option<i64>,
    ) -> Result<PollRequest> {
        if namespaces.is_empty() {
            return Err(RpcError::Generic("poll with no namespaces".into()));
        }

        let now_ms = clock.now_ms();
        let mut states = Vec::with_capacity(namespaces.len());
        {
            let conn = self.db.lock().await;
            for namespace in namespaces {
                let last_hash = messages::last_hash(
                    &conn,
                    recipient,
                    namespace.value(),
                    &snode.ed25519_pub_hex,
                    now_ms,
                )?;
                states.push(NamespacePollState {
                    namespace: *namespace,
                    last_hash,
                });
            }
        }

        let budgets = Namespace::max_size_map(namespaces, POLL_SIZE_BUDGET);
        let requests = StorageRequests::new(identity, clock);
        let mut subs: Vec<SignedRequest> = Vec::with_capacity(states.len() + 1);
        for (state, (_, max_size)) in states.iter().zip(budgets.iter()) {
            subs.push(requests.retrieve(
                state.namespace,
                state.last_hash.as_deref(),
                Some(*max_size),
            )?);
        }

        if let (false, Some(ttl)) = (refresh_hashes.is_empty(), refresh_ttl_ms) {
            subs.push(requests.expire(ExpireMode::Extend, now_ms + ttl, refresh_hashes)?);
        }

        Ok(PollRequest {
            request: batch::batch(&subs),
            states,
        })
    }

    /// Fold a poll's positional sub-responses into messages, recording the
    /// newest hash per namespace. Sub-responses beyond the retrieve ones
    /// (the TTL refresh) are ignored here.
    pub async fn process_response(
        &self,
        recipient: &str,
        snode: &ServiceNode,
        states: &[NamespacePollState],
        responses: &[SubResponse],
        now_ms: i64,
    ) -> Result<Vec<NamespacePollResult>> {
        let mut results = Vec::with_capacity(states.len());
        let conn = self.db.lock().await;

        for (state, response) in states.iter().zip(responses.iter()) {
            if !response.is_success() {
                debug!(
                    namespace = %state.namespace,
                    code = response.code,
                    "Namespace poll failed"
                );
                results.push(NamespacePollResult {
                    namespace: state.namespace,
                    last_hash_used: state.last_hash.clone(),
                    messages: Vec::new(),
                });
                continue;
            }

            let raw_messages = response
                .body
                .get("messages")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut parsed = Vec::with_capacity(raw_messages.len());
            for raw in &raw_messages {
                let hash = raw
                    .get("hash")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidResponse("message missing hash".into()))?
                    .to_string();
                let data = raw
                    .get("data")
                    .and_then(|v| v.as_str())
                    .map(|b64| {
                        base64::engine::general_purpose::STANDARD
                            .decode(b64)
                            .map_err(|e| RpcError::InvalidResponse(e.to_string()))
                    })
                    .transpose()?
                    .unwrap_or_default();
                let expires_at_ms = raw
                    .get("expiration")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(now_ms + DEFAULT_EXPIRY_MS);
                parsed.push(ReceivedMessage {
                    hash,
                    data,
                    expires_at_ms,
                });
            }

            if let Some(newest) = parsed.last() {
                messages::upsert(
                    &conn,
                    &ReceivedMessageInfo {
                        recipient: recipient.to_string(),
                        namespace: state.namespace.value(),
                        snode_ed25519: snode.ed25519_pub_hex.clone(),
                        hash: newest.hash.clone(),
                        expires_at_ms: newest.expires_at_ms,
                    },
                )?;
            }

            results.push(NamespacePollResult {
                namespace: state.namespace,
                last_hash_used: state.last_hash.clone(),
                messages: parsed,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snode() -> ServiceNode {
        ServiceNode {
            ip: "1.2.3.4".to_string(),
            port: 22021,
            ed25519_pub_hex: "ee".repeat(32),
            x25519_pub_hex: "ff".repeat(32),
        }
    }

    fn poller() -> Poller {
        Poller::new(veil_db::into_shared(veil_db::open_memory().expect("open")))
    }

    fn message_json(hash: &str, data: &[u8], expiration: Option<i64>) -> serde_json::Value {
        let mut message = serde_json::json!({
            "hash": hash,
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        });
        if let Some(expiration) = expiration {
            message["expiration"] = expiration.into();
        }
        message
    }

    #[tokio::test]
    async fn test_build_request_batches_namespaces() {
        let poller = poller();
        let identity = ClientIdentity::generate();
        let clock = NetworkClock::new();

        let request = poller
            .build_request(
                &identity,
                &clock,
                "05aa",
                &snode(),
                &[Namespace::Default, Namespace::ContactsConfig],
                &[],
                None,
            )
            .await
            .expect("build");

        let body = request.request.to_body();
        assert_eq!(body["method"], "batch");
        let subs = body["params"]["requests"].as_array().expect("subs");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0]["method"], "retrieve");
        assert_eq!(subs[0]["params"]["namespace"], 0);
        assert_eq!(subs[1]["params"]["namespace"], 3);
        // No stored hashes yet.
        assert!(request.states.iter().all(|s| s.last_hash.is_none()));
    }

    #[tokio::test]
    async fn test_build_request_appends_ttl_refresh() {
        let poller = poller();
        let identity = ClientIdentity::generate();
        let clock = NetworkClock::new();

        let request = poller
            .build_request(
                &identity,
                &clock,
                "05aa",
                &snode(),
                &[Namespace::Default],
                &["h1".to_string()],
                Some(1_000_000),
            )
            .await
            .expect("build");

        let body = request.request.to_body();
        let subs = body["params"]["requests"].as_array().expect("subs");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1]["method"], "expire");
        assert_eq!(subs[1]["params"]["extend"], true);
    }

    #[tokio::test]
    async fn test_process_response_decodes_and_records_hash() {
        let poller = poller();
        let now_ms = 1_000_000;
        let states = vec![NamespacePollState {
            namespace: Namespace::Default,
            last_hash: None,
        }];
        let responses = vec![SubResponse {
            code: 200,
            body: serde_json::json!({
                "messages": [
                    message_json("h1", b"first", Some(now_ms + 50_000)),
                    message_json("h2", b"second", None),
                ]
            }),
        }];

        let results = poller
            .process_response("05aa", &snode(), &states, &responses, now_ms)
            .await
            .expect("process");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].messages.len(), 2);
        assert_eq!(results[0].messages[0].data, b"first");
        assert_eq!(
            results[0].messages[1].expires_at_ms,
            now_ms + DEFAULT_EXPIRY_MS
        );

        // The newest hash is now on record and flows into the next request.
        let identity = ClientIdentity::generate();
        let clock = NetworkClock::new();
        let next = poller
            .build_request(
                &identity,
                &clock,
                "05aa",
                &snode(),
                &[Namespace::Default],
                &[],
                None,
            )
            .await
            .expect("build");
        assert_eq!(next.states[0].last_hash.as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn test_expired_last_hash_not_reused() {
        let poller = poller();
        let states = vec![NamespacePollState {
            namespace: Namespace::Default,
            last_hash: None,
        }];
        // Message whose expiry is already close.
        let responses = vec![SubResponse {
            code: 200,
            body: serde_json::json!({
                "messages": [message_json("h1", b"x", Some(5_000))]
            }),
        }];
        poller
            .process_response("05aa", &snode(), &states, &responses, 1_000)
            .await
            .expect("process");

        // By the next poll the server has pruned the message; so do we.
        let identity = ClientIdentity::generate();
        let clock = NetworkClock::new();
        clock.update_from_server(10_000);
        let request = poller
            .build_request(
                &identity,
                &clock,
                "05aa",
                &snode(),
                &[Namespace::Default],
                &[],
                None,
            )
            .await
            .expect("build");
        assert_eq!(request.states[0].last_hash, None);
    }

    #[tokio::test]
    async fn test_failed_namespace_keeps_empty_result() {
        let poller = poller();
        let states = vec![
            NamespacePollState {
                namespace: Namespace::Default,
                last_hash: Some("prev".to_string()),
            },
            NamespacePollState {
                namespace: Namespace::ContactsConfig,
                last_hash: None,
            },
        ];
        let responses = vec![
            SubResponse {
                code: 500,
                body: serde_json::Value::Null,
            },
            SubResponse {
                code: 200,
                body: serde_json::json!({"messages": [message_json("c1", b"cfg", None)]}),
            },
        ];

        let results = poller
            .process_response("05aa", &snode(), &states, &responses, 0)
            .await
            .expect("process");
        assert!(results[0].messages.is_empty());
        assert_eq!(results[0].last_hash_used.as_deref(), Some("prev"));
        assert_eq!(results[1].messages.len(), 1);
    }
}

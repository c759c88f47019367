//! Swarm response validation.
//!
//! Multi-node operations come back as a recursive map
//! `{"swarm": {node_ed25519_hex: item}}`. Each successful item carries a
//! base64 Ed25519 signature the node produced over an endpoint-specific
//! verification string; a single invalid signature poisons the entire
//! response, because the caller can no longer trust any of it.
//!
//! When a node returns `deleted`/`updated` as a per-namespace mapping
//! instead of a flat array, the arrays are flattened in lexicographic order
//! of the namespace key before being appended.

use std::collections::BTreeMap;

use veil_crypto::ed25519::PublicKey;

use crate::{Result, RpcError};

/// One node's entry in a swarm response.
#[derive(Clone, Debug)]
pub enum SwarmItem {
    /// The node performed the operation and signed the outcome.
    Success {
        signature: String,
        fields: serde_json::Value,
    },
    /// The node reported a failure (timeout, code, reason...).
    Failure { detail: serde_json::Value },
}

/// A parsed recursive swarm response, keyed by node Ed25519 hex.
#[derive(Clone, Debug, Default)]
pub struct SwarmResponse {
    pub items: BTreeMap<String, SwarmItem>,
}

/// How many successful, signature-valid items an operation needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quorum {
    /// Every entry must succeed (expire, expire_all, revoke_subkey).
    All,
    /// One success is enough (delete, delete_all, delete_before).
    AtLeastOne,
    /// At least half must succeed (store).
    Majority,
}

/// Parse the `{"swarm": {...}}` envelope.
pub fn parse_swarm_response(raw: &serde_json::Value) -> Result<SwarmResponse> {
    let swarm = raw
        .get("swarm")
        .and_then(|v| v.as_object())
        .ok_or_else(|| RpcError::InvalidResponse("missing swarm map".into()))?;

    let mut items = BTreeMap::new();
    for (node_key, value) in swarm {
        let failed = value.get("failed").and_then(|v| v.as_bool()).unwrap_or(false);
        let item = if failed {
            SwarmItem::Failure {
                detail: value.clone(),
            }
        } else {
            let signature = value
                .get("signature")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    RpcError::InvalidResponse(format!("node {node_key} has no signature"))
                })?
                .to_string();
            SwarmItem::Success {
                signature,
                fields: value.clone(),
            }
        };
        items.insert(node_key.clone(), item);
    }
    Ok(SwarmResponse { items })
}

/// Read a string-array field, flattening per-namespace maps in lexicographic
/// namespace order.
pub fn flatten_hash_field(fields: &serde_json::Value, name: &str) -> Vec<String> {
    match fields.get(name) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::Object(map)) => {
            // BTreeMap ordering gives the lexicographic namespace order.
            let sorted: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            sorted
                .values()
                .flat_map(|v| {
                    v.as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default()
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Per-endpoint verification string builders. `user_hex` is the recipient
/// address the request was made for.
pub mod verification {
    use super::flatten_hash_field;

    fn base(user_hex: &str) -> Vec<u8> {
        user_hex.as_bytes().to_vec()
    }

    pub fn delete(user_hex: &str, requested: &[String], fields: &serde_json::Value) -> Vec<u8> {
        let mut out = base(user_hex);
        for hash in requested {
            out.extend_from_slice(hash.as_bytes());
        }
        for hash in flatten_hash_field(fields, "deleted") {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    pub fn delete_all(user_hex: &str, timestamp_ms: i64, fields: &serde_json::Value) -> Vec<u8> {
        let mut out = base(user_hex);
        out.extend_from_slice(timestamp_ms.to_string().as_bytes());
        for hash in flatten_hash_field(fields, "deleted") {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    pub fn delete_before(user_hex: &str, before_ms: i64, fields: &serde_json::Value) -> Vec<u8> {
        let mut out = base(user_hex);
        out.extend_from_slice(before_ms.to_string().as_bytes());
        for hash in flatten_hash_field(fields, "deleted") {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    pub fn expire(
        user_hex: &str,
        applied_expiry_ms: i64,
        requested: &[String],
        fields: &serde_json::Value,
    ) -> Vec<u8> {
        let mut out = base(user_hex);
        out.extend_from_slice(applied_expiry_ms.to_string().as_bytes());
        for hash in requested {
            out.extend_from_slice(hash.as_bytes());
        }

        let mut updated = flatten_hash_field(fields, "updated");
        updated.sort();
        for hash in updated {
            out.extend_from_slice(hash.as_bytes());
        }

        // `unchanged` maps hash -> expiry; append pairs ordered by hash.
        if let Some(unchanged) = fields.get("unchanged").and_then(|v| v.as_object()) {
            let sorted: std::collections::BTreeMap<&String, &serde_json::Value> =
                unchanged.iter().collect();
            for (hash, expiry) in sorted {
                out.extend_from_slice(hash.as_bytes());
                if let Some(expiry) = expiry.as_i64() {
                    out.extend_from_slice(expiry.to_string().as_bytes());
                }
            }
        }
        out
    }

    pub fn expire_all(user_hex: &str, expiry_ms: i64, fields: &serde_json::Value) -> Vec<u8> {
        let mut out = base(user_hex);
        out.extend_from_slice(expiry_ms.to_string().as_bytes());
        for hash in flatten_hash_field(fields, "updated") {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    pub fn revoke_subkey(user_hex: &str, subkey: &[u8]) -> Vec<u8> {
        let mut out = base(user_hex);
        out.extend_from_slice(subkey);
        out
    }

    /// A store response signs the returned message hash alone.
    pub fn store(fields: &serde_json::Value) -> Vec<u8> {
        fields
            .get("hash")
            .and_then(|v| v.as_str())
            .map(|hash| hash.as_bytes().to_vec())
            .unwrap_or_default()
    }
}

/// The outcome for one node after signature verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOutcome {
    pub succeeded: bool,
    pub fields: Option<serde_json::Value>,
}

/// Verify every successful item against its verification string and apply
/// the quorum.
///
/// `build_verification` maps a success item's fields to the bytes that
/// node's signature must cover. Any invalid signature is fatal for the whole
/// call.
pub fn validate_swarm_response<F>(
    response: &SwarmResponse,
    quorum: Quorum,
    build_verification: F,
) -> Result<BTreeMap<String, NodeOutcome>>
where
    F: Fn(&serde_json::Value) -> Vec<u8>,
{
    let mut outcomes = BTreeMap::new();
    let mut successes = 0usize;

    for (node_key, item) in &response.items {
        match item {
            SwarmItem::Failure { detail } => {
                outcomes.insert(
                    node_key.clone(),
                    NodeOutcome {
                        succeeded: false,
                        fields: Some(detail.clone()),
                    },
                );
            }
            SwarmItem::Success { signature, fields } => {
                let key = PublicKey::from_hex(node_key)
                    .map_err(|_| RpcError::SignatureVerificationFailed)?;
                let message = build_verification(fields);
                key.verify_base64(&message, signature)
                    .map_err(|_| RpcError::SignatureVerificationFailed)?;

                successes += 1;
                outcomes.insert(
                    node_key.clone(),
                    NodeOutcome {
                        succeeded: true,
                        fields: Some(fields.clone()),
                    },
                );
            }
        }
    }

    let total = response.items.len();
    let quorum_met = match quorum {
        Quorum::All => successes == total && total > 0,
        Quorum::AtLeastOne => successes >= 1,
        Quorum::Majority => total > 0 && successes * 2 >= total,
    };
    if !quorum_met {
        return Err(RpcError::ValidationFailed(format!(
            "{successes} of {total} swarm entries succeeded"
        )));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::ed25519::IdentityKeys;

    fn swarm_response(entries: Vec<(String, serde_json::Value)>) -> serde_json::Value {
        let mut swarm = serde_json::Map::new();
        for (key, value) in entries {
            swarm.insert(key, value);
        }
        serde_json::json!({ "swarm": swarm })
    }

    #[test]
    fn test_parse_success_and_failure_items() {
        let raw = swarm_response(vec![
            (
                "aa".repeat(32),
                serde_json::json!({"signature": "c2ln", "deleted": ["h1"]}),
            ),
            (
                "bb".repeat(32),
                serde_json::json!({"failed": true, "timeout": true}),
            ),
        ]);

        let parsed = parse_swarm_response(&raw).expect("parse");
        assert_eq!(parsed.items.len(), 2);
        assert!(matches!(
            parsed.items.get(&"aa".repeat(32)),
            Some(SwarmItem::Success { .. })
        ));
        assert!(matches!(
            parsed.items.get(&"bb".repeat(32)),
            Some(SwarmItem::Failure { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unsigned_success() {
        let raw = swarm_response(vec![("aa".repeat(32), serde_json::json!({"deleted": []}))]);
        assert!(parse_swarm_response(&raw).is_err());
    }

    #[test]
    fn test_flatten_array_field() {
        let fields = serde_json::json!({"deleted": ["h2", "h1"]});
        assert_eq!(flatten_hash_field(&fields, "deleted"), vec!["h2", "h1"]);
    }

    #[test]
    fn test_flatten_namespace_map_lexicographic() {
        let fields = serde_json::json!({
            "deleted": {
                "2": ["c"],
                "0": ["a", "b"],
                "-10": ["z"],
            }
        });
        // Lexicographic key order: "-10" < "0" < "2".
        assert_eq!(
            flatten_hash_field(&fields, "deleted"),
            vec!["z", "a", "b", "c"]
        );
    }

    #[test]
    fn test_delete_roundtrip_verifies() {
        let node = IdentityKeys::generate();
        let node_hex = node.public_key().to_hex();
        let user = "05".to_string() + &"ab".repeat(32);
        let requested = vec!["h1".to_string(), "h2".to_string()];

        let fields = serde_json::json!({"deleted": ["h1", "h2"]});
        let message = verification::delete(&user, &requested, &fields);
        // Exact byte layout: user || requested || deleted.
        let expected: Vec<u8> = format!("{user}h1h2h1h2").into_bytes();
        assert_eq!(message, expected);

        let raw = swarm_response(vec![(
            node_hex.clone(),
            serde_json::json!({"signature": node.sign_base64(&message), "deleted": ["h1", "h2"]}),
        )]);
        let parsed = parse_swarm_response(&raw).expect("parse");

        let outcomes = validate_swarm_response(&parsed, Quorum::AtLeastOne, |fields| {
            verification::delete(&user, &requested, fields)
        })
        .expect("validate");
        assert!(outcomes.get(&node_hex).expect("outcome").succeeded);
    }

    #[test]
    fn test_bad_signature_is_fatal() {
        let node = IdentityKeys::generate();
        let other = IdentityKeys::generate();
        let user = "05".to_string() + &"ab".repeat(32);
        let requested = vec!["h1".to_string()];
        let fields = serde_json::json!({"deleted": ["h1"]});
        let message = verification::delete(&user, &requested, &fields);

        // Signed by the wrong key.
        let raw = swarm_response(vec![(
            node.public_key().to_hex(),
            serde_json::json!({"signature": other.sign_base64(&message), "deleted": ["h1"]}),
        )]);
        let parsed = parse_swarm_response(&raw).expect("parse");

        let result = validate_swarm_response(&parsed, Quorum::AtLeastOne, |fields| {
            verification::delete(&user, &requested, fields)
        });
        assert!(matches!(result, Err(RpcError::SignatureVerificationFailed)));
    }

    #[test]
    fn test_quorum_all_fails_on_one_failure() {
        let node = IdentityKeys::generate();
        let user = "05".to_string() + &"ab".repeat(32);
        let message = verification::expire_all(&user, 1000, &serde_json::json!({"updated": []}));

        let raw = swarm_response(vec![
            (
                node.public_key().to_hex(),
                serde_json::json!({"signature": node.sign_base64(&message), "updated": []}),
            ),
            (
                "bb".repeat(32),
                serde_json::json!({"failed": true, "code": 500}),
            ),
        ]);
        let parsed = parse_swarm_response(&raw).expect("parse");

        let result = validate_swarm_response(&parsed, Quorum::All, |fields| {
            verification::expire_all(&user, 1000, fields)
        });
        assert!(matches!(result, Err(RpcError::ValidationFailed(_))));
    }

    #[test]
    fn test_quorum_at_least_one_tolerates_failures() {
        let node = IdentityKeys::generate();
        let user = "05".to_string() + &"ab".repeat(32);
        let requested = vec!["h1".to_string()];
        let fields = serde_json::json!({"deleted": ["h1"]});
        let message = verification::delete(&user, &requested, &fields);

        let raw = swarm_response(vec![
            (
                node.public_key().to_hex(),
                serde_json::json!({"signature": node.sign_base64(&message), "deleted": ["h1"]}),
            ),
            (
                "bb".repeat(32),
                serde_json::json!({"failed": true, "timeout": true}),
            ),
        ]);
        let parsed = parse_swarm_response(&raw).expect("parse");

        let outcomes = validate_swarm_response(&parsed, Quorum::AtLeastOne, |fields| {
            verification::delete(&user, &requested, fields)
        })
        .expect("validate");
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes.get(&"bb".repeat(32)).expect("entry").succeeded);
    }

    #[test]
    fn test_expire_verification_order() {
        let user = "05aa";
        let requested = vec!["r1".to_string()];
        let fields = serde_json::json!({
            "updated": ["u2", "u1"],
            "unchanged": {"hb": 200, "ha": 100},
        });
        let message = verification::expire(user, 999, &requested, &fields);
        // updated sorted, unchanged pairs ordered by hash.
        assert_eq!(message, b"05aa999r1u1u2ha100hb200".to_vec());
    }

    #[test]
    fn test_store_verification_is_returned_hash() {
        let fields = serde_json::json!({"hash": "stored-hash-xyz"});
        assert_eq!(verification::store(&fields), b"stored-hash-xyz".to_vec());
    }
}

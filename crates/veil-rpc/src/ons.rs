//! Name-service resolution.
//!
//! A human-readable name resolves to a session id through an oracle RPC on
//! the snodes. The lookup key never reveals the name: the request carries
//! `base64(blake2b256(lowercased_name))`, and the returned record is
//! decrypted locally with keys derived from the name itself.
//!
//! Two sealing schemes exist:
//! - **current**: the record carries a nonce; the key is
//!   `blake2b256(name, key = blake2b256(name))` and the record opens with
//!   XChaCha20-Poly1305;
//! - **legacy** (no nonce): the key is Argon2id(name, zero salt, MODERATE)
//!   and the record opens as a secretbox under the all-zero nonce.
//!
//! Three independent queries are issued; all three must decrypt to the same
//! session id before it is accepted.

use base64::Engine;
use serde::Deserialize;
use tracing::debug;
use veil_crypto::{argon2id, blake2b, secretbox, xchacha};

use crate::request::{oxend_request, SignedRequest};
use crate::{Result, RpcError};

/// Queries issued per resolution; all must agree.
pub const RESOLUTION_QUERIES: usize = 3;

/// An encrypted name record as returned by `ons_resolve`.
#[derive(Clone, Debug, Deserialize)]
pub struct NameRecord {
    /// Hex-encoded ciphertext.
    pub encrypted_value: String,
    /// Hex-encoded 24-byte nonce; absent for legacy records.
    pub nonce: Option<String>,
}

/// The lookup hash for a name: `base64(blake2b256(lowercase(name)))`.
pub fn name_hash_b64(name: &str) -> String {
    let hash = blake2b::hash256(name.to_lowercase().as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// The oxend-wrapped resolution request for a name.
pub fn resolve_request(name: &str) -> SignedRequest {
    oxend_request(
        "ons_resolve",
        serde_json::json!({ "type": 0, "name_hash": name_hash_b64(name) }),
    )
}

/// Pull the name record out of a resolution response body.
pub fn parse_record(body: &serde_json::Value) -> Result<NameRecord> {
    // Some nodes nest the record under "result".
    let record = body.get("result").unwrap_or(body);
    serde_json::from_value(record.clone()).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

/// Decrypt a name record to the session id it names.
pub fn decrypt_record(name: &str, record: &NameRecord) -> Result<String> {
    let name = name.to_lowercase();
    let ciphertext = hex::decode(&record.encrypted_value)
        .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

    let session_id = match &record.nonce {
        Some(nonce_hex) => {
            let nonce_bytes =
                hex::decode(nonce_hex).map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
            let nonce: [u8; xchacha::NONCE_SIZE] = nonce_bytes
                .try_into()
                .map_err(|_| RpcError::InvalidResponse("nonce must be 24 bytes".into()))?;

            let outer = blake2b::hash256(name.as_bytes());
            let key = blake2b::hash256_keyed(&outer, name.as_bytes())
                .map_err(|e| RpcError::HashingFailed(e.to_string()))?;
            xchacha::decrypt(&key, &nonce, &ciphertext)
                .map_err(|_| RpcError::DecryptionFailed)?
        }
        None => {
            let key = argon2id::derive_key_moderate_zero_salt(name.as_bytes())
                .map_err(|e| RpcError::HashingFailed(e.to_string()))?;
            secretbox::open_zero_nonce(&key, &ciphertext)
                .map_err(|_| RpcError::DecryptionFailed)?
        }
    };

    Ok(hex::encode(session_id))
}

/// Combine the decrypted results of the independent queries: every query
/// must have produced the same session id.
pub fn combine_results(results: &[String]) -> Result<String> {
    let first = results
        .first()
        .ok_or_else(|| RpcError::ValidationFailed("no resolution results".into()))?;
    if results.len() < RESOLUTION_QUERIES {
        return Err(RpcError::ValidationFailed(format!(
            "only {} of {RESOLUTION_QUERIES} resolution queries answered",
            results.len()
        )));
    }
    if results.iter().any(|id| id != first) {
        return Err(RpcError::ValidationFailed(
            "resolution queries disagree".into(),
        ));
    }
    debug!(session_id = %first, "Name resolved");
    Ok(first.clone())
}

//! Layered onion envelope construction.
//!
//! Each layer is sealed with AES-256-GCM under a key derived from an
//! ephemeral X25519 exchange against that hop's public key:
//!
//! ```text
//! layer_key = Blake2b("veil v2 onion-layer-key" || 0x00 || x25519_shared)
//! ```
//!
//! Working inward-out, the innermost ciphertext is the caller's payload
//! sealed to the destination; each relay layer wraps the previous ciphertext
//! together with the ephemeral public key the next node needs and a routing
//! descriptor naming it. The guard receives only a ciphertext and the
//! outermost ephemeral key, so no single hop learns both endpoints.
//!
//! The destination seals its response with the same innermost key, which the
//! builder returns so the transport can open it.

use base64::Engine;
use veil_crypto::blake2b::{self, contexts};
use veil_crypto::x25519::{ephemeral_key_exchange, X25519PublicKey};
use veil_crypto::{aes_gcm, x25519};
use veil_types::ServiceNode;

use crate::destination::OnionDestination;
use crate::{OnionError, Result, PATH_LEN};

/// A fully constructed onion, ready to POST to the guard.
pub struct BuiltOnion {
    /// JSON body for `POST /onion_req/v2`.
    pub body: Vec<u8>,
    /// The innermost symmetric key; decrypts the destination's response.
    pub destination_key: [u8; 32],
}

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Derive the symmetric key for one layer from an X25519 shared secret.
pub fn layer_key(shared: &x25519::SharedSecret) -> [u8; 32] {
    blake2b::derive_key(contexts::ONION_LAYER_KEY, shared.as_bytes())
}

/// Seal one layer to `their_pub`, returning the ephemeral public key, the
/// derived symmetric key, and `nonce || ciphertext || tag`.
fn seal_layer(
    their_pub: &X25519PublicKey,
    plaintext: &[u8],
) -> Result<(X25519PublicKey, [u8; 32], Vec<u8>)> {
    let (eph_pub, shared) = ephemeral_key_exchange(their_pub);
    let key = layer_key(&shared);
    let ciphertext = aes_gcm::encrypt_with_prefixed_nonce(&key, plaintext)?;
    Ok((eph_pub, key, ciphertext))
}

/// Build the layered envelope for `payload` through `path` to `destination`.
///
/// `path` is guard-first; the destination must not appear among the hops.
pub fn build_onion(
    path: &[ServiceNode],
    destination: &OnionDestination,
    payload: &[u8],
) -> Result<BuiltOnion> {
    if path.len() != PATH_LEN {
        return Err(OnionError::InvalidResponse(format!(
            "path must have {PATH_LEN} hops, got {}",
            path.len()
        )));
    }

    // Innermost layer: the payload, sealed to the destination.
    let dest_pub = X25519PublicKey::from_hex(destination.x25519_pub_hex())?;
    let (mut prev_eph, destination_key, mut prev_ciphertext) = seal_layer(&dest_pub, payload)?;
    let mut prev_descriptor = destination.routing_descriptor();

    // Relay layers, exit hop first. Each hop's plaintext names the node the
    // wrapped ciphertext is for and carries the ephemeral key that node
    // needs for its own exchange.
    for hop in path.iter().skip(1).rev() {
        let mut layer = prev_descriptor.clone();
        let obj = layer
            .as_object_mut()
            .ok_or_else(|| OnionError::InvalidJson("descriptor must be an object".into()))?;
        obj.insert("ciphertext".to_string(), b64(&prev_ciphertext).into());
        obj.insert("ephemeral_key".to_string(), prev_eph.to_hex().into());

        let plaintext = serde_json::to_vec(&layer)
            .map_err(|e| OnionError::InvalidJson(e.to_string()))?;
        let hop_pub = X25519PublicKey::from_hex(&hop.x25519_pub_hex)?;
        let (eph, _key, ciphertext) = seal_layer(&hop_pub, &plaintext)?;

        prev_eph = eph;
        prev_ciphertext = ciphertext;
        prev_descriptor = serde_json::json!({ "destination": hop.ed25519_pub_hex });
    }

    // Guard layer: sealed like the others, but its ciphertext and ephemeral
    // key travel in the clear as the POST body.
    let guard = &path[0];
    let mut layer = prev_descriptor;
    let obj = layer
        .as_object_mut()
        .ok_or_else(|| OnionError::InvalidJson("descriptor must be an object".into()))?;
    obj.insert("ciphertext".to_string(), b64(&prev_ciphertext).into());
    obj.insert("ephemeral_key".to_string(), prev_eph.to_hex().into());

    let plaintext =
        serde_json::to_vec(&layer).map_err(|e| OnionError::InvalidJson(e.to_string()))?;
    let guard_pub = X25519PublicKey::from_hex(&guard.x25519_pub_hex)?;
    let (guard_eph, _key, guard_ciphertext) = seal_layer(&guard_pub, &plaintext)?;

    let body = serde_json::json!({
        "ciphertext": b64(&guard_ciphertext),
        "ephemeral_key": guard_eph.to_hex(),
    });

    Ok(BuiltOnion {
        body: serde_json::to_vec(&body).map_err(|e| OnionError::InvalidJson(e.to_string()))?,
        destination_key,
    })
}

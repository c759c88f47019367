//! Blake2b-256 hashing and key derivation.
//!
//! Blake2b serves three purposes in the Veil protocol:
//!
//! - [`hash256`] — name hashing for name-service lookups
//! - [`hash256_keyed`] — keyed derivation of name-record decryption keys
//! - [`derive_key`] — domain-separated derivation of onion layer keys from
//!   X25519 shared secrets
//!
//! Cross-domain collisions are prevented by mandatory context strings; using
//! an unregistered context is a protocol violation.

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac, Digest};

use crate::{CryptoError, Result};

type Blake2b256 = Blake2b<U32>;
type Blake2bMac256 = Blake2bMac<U32>;

/// Registered key-derivation context strings.
pub mod contexts {
    /// Symmetric key for a single onion layer.
    pub const ONION_LAYER_KEY: &str = "veil v2 onion-layer-key";

    /// All registered context strings. Using any other is a protocol violation.
    pub const ALL_CONTEXTS: &[&str] = &[ONION_LAYER_KEY];
}

/// Compute the Blake2b-256 hash of the input data.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Compute a keyed Blake2b-256 hash.
///
/// The key must be 1..=64 bytes, per the Blake2b specification.
pub fn hash256_keyed(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = Blake2bMac256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 64,
        actual: key.len(),
    })?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derive a 32-byte key from input material under a registered context.
///
/// Computed as `Blake2b-256(context || 0x00 || material)`; the NUL separator
/// keeps context/material boundaries unambiguous.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(context.as_bytes());
    hasher.update([0u8]);
    hasher.update(material);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

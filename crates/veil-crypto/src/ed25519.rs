//! Ed25519 signing and verification (RFC 8032).
//!
//! Ed25519 shows up in exactly two places in Veil, and this module is shaped
//! around them:
//!
//! - the client signs the canonical byte string of every authenticated
//!   storage request with its long-term identity key, and the envelope
//!   carries that signature as base64 ([`IdentityKeys::sign_base64`]);
//! - swarm nodes sign their response outcomes, and the client checks those
//!   against the hex-encoded keys the pool advertises
//!   ([`PublicKey::verify_base64`]).

use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Seed and public key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Detached signature length in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// The long-term identity signing key.
///
/// Persisted and restored as its 32-byte seed; the seed is wiped on drop.
pub struct IdentityKeys {
    seed: [u8; KEY_SIZE],
    signing: ed25519_dalek::SigningKey,
}

/// An Ed25519 public key as it travels on the wire: 64 hex characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl IdentityKeys {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
        Self::from_seed(seed)
    }

    /// Restore an identity from its stored seed.
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        Self {
            seed,
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }

    /// The seed to persist.
    pub fn seed(&self) -> [u8; KEY_SIZE] {
        self.seed
    }

    /// The public half of this identity.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.signing.verifying_key(),
        }
    }

    /// Sign a message, returning the raw detached signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    /// Sign a canonical request string, returning the base64 form the
    /// request envelope carries.
    pub fn sign_base64(&self, message: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.sign(message))
    }
}

impl Clone for IdentityKeys {
    fn clone(&self) -> Self {
        Self::from_seed(self.seed)
    }
}

impl Drop for IdentityKeys {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the seed.
        f.debug_struct("IdentityKeys")
            .field("public", &self.public_key().to_hex())
            .finish()
    }
}

impl PublicKey {
    /// Parse a key from its 64-character wire hex.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|bytes: Vec<u8>| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Self::from_bytes(&arr)
    }

    /// Build a key from raw bytes; fails on points not on the curve.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The wire hex of this key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.as_bytes())
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.inner.as_bytes()
    }

    /// Verify a raw detached signature.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Result<()> {
        self.inner
            .verify(message, &ed25519_dalek::Signature::from_bytes(signature))
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Verify a base64 signature, as swarm response items carry them.
    pub fn verify_base64(&self, message: &[u8], signature_b64: &str) -> Result<()> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let signature: [u8; SIGNATURE_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidKeyLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            }
        })?;
        self.verify(message, &signature)
    }
}

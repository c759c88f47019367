//! # veil-crypto
//!
//! Cryptographic primitives for the Veil client core.
//!
//! The swarm storage protocol fixes its cryptographic suite; no algorithm
//! negotiation takes place. This crate wraps the individual primitives with
//! Veil-specific types so the rest of the workspace never touches the
//! underlying crates directly.
//!
//! ## Modules
//!
//! - [`ed25519`] — Ed25519 identity signing and per-snode verification (RFC 8032)
//! - [`x25519`] — X25519 key agreement for onion layer keys (RFC 7748)
//! - [`aes_gcm`] — AES-256-GCM AEAD used by every onion layer
//! - [`blake2b`] — Blake2b-256 hashing and key derivation
//! - [`argon2id`] — Argon2id key derivation for legacy name-record decryption
//! - [`xchacha`] — XChaCha20-Poly1305 AEAD for current name-record decryption
//! - [`secretbox`] — XSalsa20-Poly1305 secretbox for legacy name records

pub mod aes_gcm;
pub mod argon2id;
pub mod blake2b;
pub mod ed25519;
pub mod secretbox;
pub mod x25519;
pub mod xchacha;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Argon2id hashing failed.
    #[error("argon2id error: {0}")]
    Argon2(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

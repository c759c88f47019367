//! XChaCha20-Poly1305 AEAD.
//!
//! Current name records are sealed with XChaCha20-Poly1305 under a keyed
//! Blake2b derivation of the record name; the 24-byte nonce travels with
//! the record.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use crate::{CryptoError, Result};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Decrypt an XChaCha20-Poly1305 ciphertext (tag appended).
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Encrypt with XChaCha20-Poly1305 (tag appended).
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AeadDecryption)
}

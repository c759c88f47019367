//! XSalsa20-Poly1305 secretbox.
//!
//! Legacy name records are sealed with libsodium `crypto_secretbox` under an
//! Argon2id-derived key and an all-zero nonce. Kept only so those records
//! remain resolvable.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};

use crate::{CryptoError, Result};

/// Nonce size for secretbox (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Open a secretbox ciphertext.
pub fn open(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Seal a secretbox ciphertext.
pub fn seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Open with the all-zero nonce used by legacy name records.
pub fn open_zero_nonce(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    open(key, &[0u8; NONCE_SIZE], ciphertext)
}

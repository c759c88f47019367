//! AES-256-GCM AEAD encryption.
//!
//! Every onion layer and every layered response is sealed with AES-256-GCM
//! under a key derived from an X25519 exchange. Ciphertexts on the wire carry
//! the 12-byte nonce as a prefix (`iv || ciphertext || tag`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::{CryptoError, Result};

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for AES-256-GCM (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt with AES-256-GCM under an explicit nonce.
///
/// Returns ciphertext with appended 16-byte authentication tag. The nonce is
/// NOT included; use [`encrypt_with_prefixed_nonce`] for the wire form.
pub fn encrypt(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Decrypt with AES-256-GCM under an explicit nonce.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Encrypt with a random nonce, returning `nonce || ciphertext || tag`.
///
/// This is the wire form used by onion layers and layered responses.
pub fn encrypt_with_prefixed_nonce(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut nonce);

    let mut out = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&encrypt(key, &nonce, plaintext)?);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext || tag` blob.
pub fn decrypt_with_prefixed_nonce(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidInput(format!(
            "ciphertext too short: {} bytes",
            data.len()
        )));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&data[..NONCE_SIZE]);
    decrypt(key, &nonce, &data[NONCE_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];

        let ciphertext = encrypt(&key, &nonce, b"onion layer payload").expect("encrypt");
        let decrypted = decrypt(&key, &nonce, &ciphertext).expect("decrypt");
        assert_eq!(decrypted, b"onion layer payload");
    }

    #[test]
    fn test_ciphertext_has_tag() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];
        let ciphertext = encrypt(&key, &nonce, b"test").expect("encrypt");
        assert_eq!(ciphertext.len(), 4 + TAG_SIZE);
    }

    #[test]
    fn test_prefixed_nonce_roundtrip() {
        let key = [0x07u8; KEY_SIZE];
        let blob = encrypt_with_prefixed_nonce(&key, b"response body").expect("encrypt");
        assert_eq!(blob.len(), NONCE_SIZE + 13 + TAG_SIZE);
        let plain = decrypt_with_prefixed_nonce(&key, &blob).expect("decrypt");
        assert_eq!(plain, b"response body");
    }

    #[test]
    fn test_prefixed_nonce_unique() {
        let key = [0x07u8; KEY_SIZE];
        let a = encrypt_with_prefixed_nonce(&key, b"x").expect("encrypt");
        let b = encrypt_with_prefixed_nonce(&key, b"x").expect("encrypt");
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = encrypt_with_prefixed_nonce(&[0x01u8; KEY_SIZE], b"test").expect("encrypt");
        assert!(decrypt_with_prefixed_nonce(&[0x02u8; KEY_SIZE], &blob).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0x01u8; KEY_SIZE];
        let mut blob = encrypt_with_prefixed_nonce(&key, b"test").expect("encrypt");
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(decrypt_with_prefixed_nonce(&key, &blob).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let key = [0x01u8; KEY_SIZE];
        assert!(decrypt_with_prefixed_nonce(&key, &[0u8; 10]).is_err());
    }
}

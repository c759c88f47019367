//! Argon2id key derivation.
//!
//! Used only for decrypting legacy name records, which were sealed under
//! `Argon2id(name, zero_salt)` at libsodium MODERATE cost before the keyed
//! Blake2b scheme replaced it.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::{CryptoError, Result};

/// libsodium `crypto_pwhash` MODERATE memory cost (256 MiB, in KiB).
pub const MODERATE_M_COST: u32 = 262144;
/// libsodium `crypto_pwhash` MODERATE iteration count.
pub const MODERATE_T_COST: u32 = 3;
/// libsodium `crypto_pwhash` parallelism (always 1).
pub const MODERATE_P_COST: u32 = 1;

/// Output length for secretbox keys.
pub const OUTPUT_LEN: usize = 32;

/// Derive a 32-byte key at MODERATE cost with an all-zero 16-byte salt.
///
/// Matches the legacy name-record sealing exactly; any deviation makes old
/// records undecryptable.
pub fn derive_key_moderate_zero_salt(password: &[u8]) -> Result<[u8; OUTPUT_LEN]> {
    derive_key_custom(
        password,
        &[0u8; 16],
        MODERATE_M_COST,
        MODERATE_T_COST,
        MODERATE_P_COST,
    )
}

/// Derive a 32-byte key with custom Argon2id parameters.
pub fn derive_key_custom(
    password: &[u8],
    salt: &[u8],
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
) -> Result<[u8; OUTPUT_LEN]> {
    let params = Params::new(m_cost, t_cost, p_cost, Some(OUTPUT_LEN))
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; OUTPUT_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        // Small parameters to keep the test fast.
        let k1 = derive_key_custom(b"alias", b"0000000000000000", 1024, 1, 1).expect("derive");
        let k2 = derive_key_custom(b"alias", b"0000000000000000", 1024, 1, 1).expect("derive");
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_derive_key_different_passwords() {
        let salt = b"0000000000000000";
        let k1 = derive_key_custom(b"alias1", salt, 1024, 1, 1).expect("derive");
        let k2 = derive_key_custom(b"alias2", salt, 1024, 1, 1).expect("derive");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_derive_key_different_salts() {
        let k1 = derive_key_custom(b"alias", b"0000000000000000", 1024, 1, 1).expect("derive");
        let k2 = derive_key_custom(b"alias", b"1111111111111111", 1024, 1, 1).expect("derive");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_moderate_constants() {
        assert_eq!(MODERATE_M_COST, 262144);
        assert_eq!(MODERATE_T_COST, 3);
        assert_eq!(MODERATE_P_COST, 1);
    }
}

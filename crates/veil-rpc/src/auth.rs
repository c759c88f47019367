//! The client's long-term identity.
//!
//! Storage requests are signed with the Ed25519 identity key; the recipient
//! address the swarm stores messages under is the X25519 public key with the
//! `05` prefix byte, hex-encoded.

use veil_crypto::ed25519::IdentityKeys;
use veil_crypto::x25519::X25519SecretKey;

/// Long-term identity keys for signing and addressing.
pub struct ClientIdentity {
    pub ed25519: IdentityKeys,
    pub x25519: X25519SecretKey,
}

impl ClientIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            ed25519: IdentityKeys::generate(),
            x25519: X25519SecretKey::random(),
        }
    }

    /// Restore an identity from the two stored seeds.
    pub fn from_seeds(ed25519_seed: [u8; 32], x25519_seed: [u8; 32]) -> Self {
        Self {
            ed25519: IdentityKeys::from_seed(ed25519_seed),
            x25519: X25519SecretKey::from_bytes(x25519_seed),
        }
    }

    /// The swarm address: `"05"` + X25519 public key hex.
    pub fn session_id(&self) -> String {
        format!("05{}", self.x25519.public_key().to_hex())
    }

    /// Hex of the Ed25519 public key, sent as `pubkey_ed25519`.
    pub fn ed25519_pub_hex(&self) -> String {
        self.ed25519.public_key().to_hex()
    }
}

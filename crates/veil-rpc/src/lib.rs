//! # veil-rpc
//!
//! Typed, signed storage RPCs against the swarm network.
//!
//! - [`auth`] - the client's long-term identity keys
//! - [`request`] - request builders and canonical signing byte strings
//! - [`verify`] - recursive swarm responses, per-node signatures, quora
//! - [`batch`] - batch/sequence sub-request framing with positional decoders
//! - [`ons`] - name-service resolution
//! - [`poll`] - multi-namespace message polling with last-hash tracking
//! - [`client`] - glue binding the RPCs to the onion transport

pub mod auth;
pub mod batch;
pub mod client;
pub mod ons;
pub mod poll;
pub mod request;
pub mod verify;

pub use auth::ClientIdentity;
pub use client::SnodeClient;
pub use request::{SignedRequest, StorageRequests};

/// Error types for storage RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The local identity keys are missing.
    #[error("no identity key pair")]
    NoKeyPair,

    /// A request could not be signed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// A swarm entry's signature did not verify; the whole response is
    /// untrustworthy.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Hashing a name or payload failed.
    #[error("hashing failed: {0}")]
    HashingFailed(String),

    /// A name record or payload failed to decrypt.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The swarm rejected the request timestamp.
    #[error("clock out of sync with the network")]
    ClockOutOfSync,

    /// Too few swarm entries satisfied the operation's quorum.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A response violated the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure.
    #[error(transparent)]
    Onion(#[from] veil_onion::OnionError),

    /// Discovery failure.
    #[error(transparent)]
    Snode(#[from] veil_snode::SnodeError),

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] veil_db::DbError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] veil_crypto::CryptoError),

    /// Anything else.
    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

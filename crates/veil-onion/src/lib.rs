//! # veil-onion
//!
//! Onion request transport for the Veil client core.
//!
//! - [`destination`] - request destinations (snode or external server)
//! - [`path`] - 3-hop path construction, guard testing, rotation on failure
//! - [`envelope`] - layered AES-GCM onion construction
//! - [`response`] - v3/v4 response decoding, including the bencoded v4 frame
//! - [`transport`] - sending onions through a path and classifying failures
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Path length | 3 hops, guard first |
//! | Target cached paths | 2, guards mutually distinct |
//! | Path / node failure threshold | 3 |
//! | Max request size | 10 MB |
//! | Default timeout | 10 s |

pub mod destination;
pub mod envelope;
pub mod path;
pub mod response;
pub mod transport;

pub use destination::{OnionDestination, ServerVersion};
pub use path::{GuardProbe, OnionPath, PathManager};
pub use transport::{OnionResponse, OnionTransport};

/// Number of hops in an onion path.
pub const PATH_LEN: usize = 3;

/// Number of paths the client keeps built.
pub const TARGET_PATHS: usize = 2;

/// Failures before a path is torn down.
pub const PATH_FAIL_THRESHOLD: u32 = 3;

/// Minimum snode version accepted for guards.
pub const MIN_NODE_VERSION: &str = "2.0.7";

/// Maximum size of the outermost onion body.
pub const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Fraction of [`MAX_REQUEST_SIZE`] at which a warning is logged.
pub const REQUEST_SIZE_WARN_FRACTION: f64 = 0.75;

/// Default per-request deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Guard version-test deadline in seconds.
pub const GUARD_TEST_TIMEOUT_SECS: u64 = 3;

/// Backoff between guard-test attempts in milliseconds.
pub const GUARD_TEST_RETRY_DELAY_MS: u64 = 100;

/// Error types for onion transport operations.
#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    /// Not enough pool nodes to build the requested paths.
    #[error("insufficient snodes: need {need}, have {have}")]
    InsufficientSnodes { need: usize, have: usize },

    /// A guard candidate's stats response carried no version.
    #[error("snode version missing")]
    MissingSnodeVersion,

    /// A guard candidate is below the minimum version.
    #[error("unsupported snode version {0}")]
    UnsupportedSnodeVersion(String),

    /// A URL could not be constructed or parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A body that should have been JSON was not.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A response violated the framing rules.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A layered response failed to decrypt.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The destination rejected the request signature (HTTP 401).
    #[error("signature verification failed at destination")]
    SignatureVerificationFailed,

    /// The destination rejected the embedded timestamp (HTTP 406/425).
    #[error("clock out of sync with the network")]
    ClockOutOfSync,

    /// The guard (or a relay) rejected the request.
    #[error("HTTP request failed with status {status}: {body}")]
    HttpRequestFailed { status: u16, body: String },

    /// The destination answered with a non-success status.
    #[error("request failed at destination {destination} with status {status}: {body}")]
    HttpRequestFailedAtDestination {
        status: u16,
        body: String,
        destination: String,
    },

    /// The request deadline expired. Not credited to any snode.
    #[error("onion request timed out")]
    Timeout,

    /// The request body exceeds [`MAX_REQUEST_SIZE`].
    #[error("request too large: {0} bytes")]
    RequestTooLarge(usize),

    /// Cryptographic failure while building or opening layers.
    #[error("crypto error: {0}")]
    Crypto(#[from] veil_crypto::CryptoError),

    /// Discovery failure from the snode layer.
    #[error(transparent)]
    Snode(#[from] veil_snode::SnodeError),

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] veil_db::DbError),
}

pub type Result<T> = std::result::Result<T, OnionError>;

//! # veil-snode
//!
//! Service-node discovery and swarm management.
//!
//! - [`seed`] — bootstrap the pool from the compiled-in seed nodes
//! - [`pool`] — the global service-node pool with TTL-based refresh
//! - [`swarm`] — per-recipient swarm resolution and eviction
//!
//! The pool refuses to build paths below [`MIN_POOL`] nodes; a swarm is
//! usable only with at least [`MIN_SWARM`] members. One refresh is in flight
//! at a time; concurrent callers share its outcome.

pub mod pool;
pub mod seed;
pub mod swarm;

pub use pool::{DirectoryTransport, NoTransport, SnodeDirectory};

/// Minimum pool size before path building may proceed.
pub const MIN_POOL: usize = 12;

/// Minimum members for a swarm to be usable.
pub const MIN_SWARM: usize = 3;

/// Pool refresh interval in seconds (2 hours).
pub const POOL_TTL_SECS: i64 = 2 * 60 * 60;

/// Maximum number of nodes kept in the pool.
pub const POOL_CAP: usize = 256;

/// A random-node pool refresh requires the three views to agree on more
/// than this many nodes.
pub const MIN_POOL_INTERSECTION: usize = 24;

/// Consecutive failures before a node is dropped from the pool and every
/// swarm.
pub const NODE_FAIL_THRESHOLD: u32 = 3;

/// Error types for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum SnodeError {
    /// The pool could not be refreshed from seeds or peers.
    #[error("pool updating failed: {0}")]
    PoolUpdatingFailed(String),

    /// Not enough distinct nodes for the requested operation.
    #[error("insufficient snodes: need {need}, have {have}")]
    InsufficientSnodes { need: usize, have: usize },

    /// Random-node pool views did not agree.
    #[error("inconsistent pools: intersection of {0} nodes is too small")]
    InconsistentPools(usize),

    /// Swarm response could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure reported by the onion layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] veil_db::DbError),
}

pub type Result<T> = std::result::Result<T, SnodeError>;

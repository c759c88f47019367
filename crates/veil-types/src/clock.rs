//! Network-adjusted clock.
//!
//! Signed storage requests embed a timestamp the swarm checks against its
//! consensus clock. [`NetworkClock`] tracks a signed millisecond offset from
//! local wall time, updated opportunistically whenever a node responds with
//! its own authoritative timestamp. The offset starts at zero on every
//! launch.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-shared clock offset against the network's consensus clock.
#[derive(Debug, Default)]
pub struct NetworkClock {
    offset_ms: AtomicI64,
}

impl NetworkClock {
    /// Create a clock with zero offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local wall-clock time in Unix milliseconds.
    pub fn wall_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Current network time in Unix milliseconds (wall time plus offset).
    pub fn now_ms(&self) -> i64 {
        Self::wall_ms() + self.offset_ms()
    }

    /// The current offset in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Update the offset from a node's authoritative timestamp.
    pub fn update_from_server(&self, server_now_ms: i64) {
        let offset = server_now_ms - Self::wall_ms();
        self.offset_ms.store(offset, Ordering::Relaxed);
    }
}

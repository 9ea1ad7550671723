//! Time abstraction for the gating engine.
//!
//! This module provides:
//! - `TimeSource` trait for abstracting the monotonic clock
//! - `RealTime` implementation backed by `Instant`
//! - `VirtualTime` implementation for deterministic tests and trace replay

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Abstraction over the monotonic clock used to timestamp acknowledgment events.
///
/// All engine timestamps are nanoseconds since an arbitrary epoch. Zero is reserved
/// by the flow statistics as "never", so implementations should start their epoch
/// slightly in the past or accept that an event at exactly `0` looks unset.
pub trait TimeSource: Send + Sync + Clone + 'static {
    /// Returns the current time as nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;

    /// Returns the current time as a Duration since an arbitrary epoch.
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }
}

/// Real-time implementation backed by the process monotonic clock.
#[derive(Clone)]
pub struct RealTime {
    epoch: Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        // Offset by one so the first event never lands on the "unset" sentinel.
        (self.epoch.elapsed().as_nanos() as u64).saturating_add(1)
    }
}

/// Virtual time implementation for deterministic simulation.
///
/// Time only advances when explicitly stepped via `advance()` or `advance_to()`.
/// Clones share the same clock.
#[derive(Clone, Debug)]
pub struct VirtualTime {
    current_nanos: Arc<AtomicU64>,
}

impl Default for VirtualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTime {
    /// Creates a new virtual time starting at 0.
    pub fn new() -> Self {
        Self::with_initial_time(0)
    }

    /// Creates a new virtual time starting at the given nanoseconds.
    pub fn with_initial_time(initial_nanos: u64) -> Self {
        Self {
            current_nanos: Arc::new(AtomicU64::new(initial_nanos)),
        }
    }

    /// Advances time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.current_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(nanos))
            })
            .ok();
    }

    /// Advances time to the given absolute nanoseconds.
    ///
    /// Virtual time never goes backwards; a target in the past is ignored.
    pub fn advance_to(&self, target_nanos: u64) {
        self.current_nanos.fetch_max(target_nanos, Ordering::SeqCst);
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.current_nanos.load(Ordering::SeqCst)
    }
}

//! Wall-clock sources feeding a [`LogicalClock`](super::LogicalClock).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A monotonic millisecond counter.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Milliseconds elapsed since an arbitrary, fixed epoch.
    fn now_millis(&self) -> i64;
}

/// Time source shared between a clock and its owner.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Time source backed by [`tokio::time::Instant`].
///
/// Follows the paused test clock when running under
/// `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSource {
    epoch: tokio::time::Instant,
}

impl TokioTimeSource {
    /// Create a source whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    /// Create a shared handle to a fresh source.
    #[must_use]
    pub fn shared() -> SharedTimeSource {
        Arc::new(Self::new())
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now_millis(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Hand-driven time source for deterministic tests.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicI64>,
}

impl ManualTimeSource {
    /// Create a source reading `start` milliseconds.
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move the counter forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the counter to `millis`.
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

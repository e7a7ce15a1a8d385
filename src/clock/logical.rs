//! Monotone logical clock with pending drift corrections.

use std::cmp::Ordering;

use super::source::{SharedTimeSource, TokioTimeSource};
use crate::error::{Result, SyncError};

/// Millisecond clock that can be re-anchored and nudged by drift corrections.
///
/// Successive [`get_time`](Self::get_time) results never decrease, even while
/// a negative correction is being absorbed.
pub struct LogicalClock {
    /// Wall-clock source.
    source: SharedTimeSource,
    /// Wall-clock reading taken at the last reset or set.
    origin_wall_time: i64,
    /// Logical time at `origin_wall_time`.
    base_time: i64,
    /// Signed correction not yet folded into the reported time.
    pending_adjustment: i64,
    /// Value returned by the previous read.
    last_reported_time: i64,
    /// Whether the owner considers this clock synchronized.
    started: bool,
}

impl LogicalClock {
    /// Create a stopped clock reading zero, anchored to `source`.
    #[must_use]
    pub fn new(source: SharedTimeSource) -> Self {
        let origin_wall_time = source.now_millis();
        Self {
            source,
            origin_wall_time,
            base_time: 0,
            pending_adjustment: 0,
            last_reported_time: 0,
            started: false,
        }
    }

    /// Create a clock driven by the tokio clock.
    #[must_use]
    pub fn system() -> Self {
        Self::new(TokioTimeSource::shared())
    }

    /// Mark the clock as started.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Mark the clock as stopped. Stored time is unaffected.
    pub fn stop(&mut self) {
        self.started = false;
    }

    /// Whether the clock has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Logical time at the last anchor.
    #[must_use]
    pub fn get_start_time(&self) -> i64 {
        self.base_time
    }

    /// Correction still waiting to be applied.
    #[must_use]
    pub fn pending_adjustment(&self) -> i64 {
        self.pending_adjustment
    }

    /// Zero the clock and re-anchor it to the current wall time.
    pub fn reset(&mut self) {
        self.base_time = 0;
        self.origin_wall_time = self.source.now_millis();
        self.pending_adjustment = 0;
        self.last_reported_time = 0;
    }

    /// Reset, then start.
    pub fn restart(&mut self) {
        self.reset();
        self.start();
    }

    /// Reset to `time` and start. A rejected time leaves the clock untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTimeValue`] if `time` is negative.
    pub fn restart_at(&mut self, time: i64) -> Result<()> {
        if time < 0 {
            return Err(SyncError::InvalidTimeValue { value: time });
        }
        self.reset();
        self.set_time(time)?;
        self.start();
        Ok(())
    }

    /// Jump to `time` milliseconds, anchored at the current wall time.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTimeValue`] if `time` is negative.
    pub fn set_time(&mut self, time: i64) -> Result<()> {
        if time < 0 {
            return Err(SyncError::InvalidTimeValue { value: time });
        }
        let now = self.source.now_millis();
        self.anchor(time, now);
        Ok(())
    }

    /// Queue a signed correction; observable on the next read.
    pub fn adjust(&mut self, delta: i64) {
        self.pending_adjustment = self.pending_adjustment.saturating_add(delta);
    }

    /// Current logical time in milliseconds.
    ///
    /// Positive corrections are applied in full. A negative correction is
    /// applied once it no longer moves time below the previous read;
    /// until then the read is held at the previous value and the wall time
    /// that elapsed meanwhile is credited against the correction.
    pub fn get_time(&mut self) -> i64 {
        let now = self.source.now_millis();
        let mut time = now - self.origin_wall_time + self.base_time;

        match self.pending_adjustment.cmp(&0) {
            Ordering::Greater => {
                time += self.pending_adjustment;
                self.anchor(time, now);
                self.pending_adjustment = 0;
            }
            Ordering::Less => {
                let candidate = time + self.pending_adjustment;
                if candidate >= self.last_reported_time {
                    time = candidate;
                    self.anchor(time, now);
                    self.pending_adjustment = 0;
                } else {
                    self.pending_adjustment += time - self.last_reported_time;
                    time = self.last_reported_time;
                    self.anchor(time, now);
                }
            }
            Ordering::Equal => {}
        }

        self.last_reported_time = time;
        time
    }

    fn anchor(&mut self, time: i64, now: i64) {
        self.base_time = time;
        self.origin_wall_time = now;
    }
}

impl std::fmt::Debug for LogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalClock")
            .field("base_time", &self.base_time)
            .field("pending_adjustment", &self.pending_adjustment)
            .field("last_reported_time", &self.last_reported_time)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

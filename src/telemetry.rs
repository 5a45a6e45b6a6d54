//! Operation-rate instrumentation.
//!
//! Every storage call ticks a shared [`OpRateTracker`]. The tracker reports
//! how many operations happened in the trailing window (60 s), as ops/sec,
//! for whatever monitoring surface sits on top of the store.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sliding window used for rate calculation.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Ticks retained at most; older ticks are dropped first.
const MAX_TICKS: usize = 10_000;

/// Calls slower than this are logged at WARN.
const SLOW_OPERATION: Duration = Duration::from_secs(5);

/// Calls slower than this are logged at INFO.
const NOTABLE_OPERATION: Duration = Duration::from_secs(1);

/// Sliding-window operation counter.
pub struct OpRateTracker {
    ticks: Mutex<VecDeque<Instant>>,
}

impl fmt::Debug for OpRateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRateTracker")
            .field("ops_per_sec", &self.ops_per_sec())
            .finish()
    }
}

impl Default for OpRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRateTracker {
    pub fn new() -> Self {
        Self {
            ticks: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one operation now.
    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    /// Record one operation at `at`.
    pub fn record_at(&self, at: Instant) {
        let mut ticks = self.ticks.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut ticks, at);
        if ticks.len() >= MAX_TICKS {
            ticks.pop_front();
        }
        ticks.push_back(at);
    }

    /// Operations per second over the trailing window.
    pub fn ops_per_sec(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    /// Operations per second over the window ending at `now`.
    pub fn rate_at(&self, now: Instant) -> f64 {
        let ticks = self.ticks.lock().unwrap_or_else(PoisonError::into_inner);
        let recent = ticks
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) <= RATE_WINDOW && t <= now)
            .count();
        recent as f64 / RATE_WINDOW.as_secs_f64()
    }
}

fn prune(ticks: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = ticks.front() {
        if now.saturating_duration_since(oldest) > RATE_WINDOW {
            ticks.pop_front();
        } else {
            break;
        }
    }
}

/// Tick `rate`, run `f`, and log how long it took.
pub(crate) fn observe<T, E: fmt::Display>(
    rate: &OpRateTracker,
    operation: &'static str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    rate.record();
    let started = Instant::now();
    let result = f();
    let elapsed = started.elapsed();

    match &result {
        Err(e) => {
            tracing::error!(operation, elapsed_ms = elapsed.as_millis() as u64, error = %e, "Storage operation failed");
        }
        Ok(_) if elapsed > SLOW_OPERATION => {
            tracing::warn!(operation, elapsed_ms = elapsed.as_millis() as u64, "Slow storage operation");
        }
        Ok(_) if elapsed > NOTABLE_OPERATION => {
            tracing::info!(operation, elapsed_ms = elapsed.as_millis() as u64, "Storage operation completed");
        }
        Ok(_) => {
            tracing::debug!(operation, elapsed_us = elapsed.as_micros() as u64, "Storage operation completed");
        }
    }
    result
}

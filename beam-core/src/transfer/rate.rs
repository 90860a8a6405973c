//! Rolling-window transfer-rate estimator.
//!
//! The whole-run average in the final summary hides stalls; the live
//! progress display wants the rate over the last second or so. The
//! estimator records `(timestamp, bytes)` samples and averages over the
//! most recent window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window rate estimator.
pub struct RateEstimator {
    /// Samples: `(when, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    /// Window duration.
    window: Duration,
    /// Running total of bytes in the window.
    total_bytes: u64,
}

impl RateEstimator {
    /// Create an estimator with a 1-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    /// Create an estimator with a custom window duration.
    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(256),
            window,
            total_bytes: 0,
        }
    }

    /// Record that `bytes` moved at the current instant.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.evict(when);
    }

    /// Estimated rate in bytes/second over the rolling window.
    ///
    /// Returns 0.0 until at least two samples span a measurable
    /// interval.
    pub fn rate(&self) -> f64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some((first, _)), Some((last, _))) => (*first, *last),
            _ => return 0.0,
        };
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Number of samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

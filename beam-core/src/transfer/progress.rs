//! Progress reporting — aggregation and throttling of raw updates.
//!
//! Sessions offer updates with non-blocking semantics on a small
//! channel; dropped updates are acceptable because the reporter only
//! renders a throttled view. The reporter aggregates cumulative bytes,
//! derives percentage and average throughput, and emits a final summary
//! once the cumulative count reaches the announced total.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::message::FileMetadata;
use crate::transfer::rate::RateEstimator;

/// Capacity of the update channel between session and reporter.
pub const PROGRESS_CAPACITY: usize = 50;

/// One raw update from a session.
///
/// The first update of a transfer carries the metadata; later updates
/// carry only the freshly moved byte count.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub new_bytes: u64,
    pub metadata: Option<FileMetadata>,
}

/// Non-blocking producer half.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSender {
    /// Announce the transfer; always the first update.
    pub fn announce(&self, metadata: FileMetadata) {
        let _ = self.tx.try_send(ProgressUpdate {
            new_bytes: 0,
            metadata: Some(metadata),
        });
    }

    /// Offer a byte-count update; drops when the reporter lags.
    pub fn offer(&self, new_bytes: u64) {
        let _ = self.tx.try_send(ProgressUpdate {
            new_bytes,
            metadata: None,
        });
    }
}

/// Build the update channel.
pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ProgressUpdate>) {
    let (tx, rx) = mpsc::channel(PROGRESS_CAPACITY);
    (ProgressSender { tx }, rx)
}

// ── Observations ─────────────────────────────────────────────────

/// A throttled snapshot for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressObservation {
    pub name: String,
    pub cumulative: u64,
    pub total: u64,
    /// 0.0–100.0; 100.0 for an empty file.
    pub percent: f64,
    /// Recent rate (rolling window), falling back to the whole-run
    /// average before the window has two samples. Bytes per second.
    pub throughput: f64,
}

/// Final line of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub name: String,
    pub bytes: u64,
    pub duration: Duration,
    /// Whole-run average, bytes per second.
    pub throughput: f64,
    pub checksum: String,
}

// ── Reporter ─────────────────────────────────────────────────────

/// Aggregates raw updates into throttled observations and one summary.
pub struct ProgressReporter {
    metadata: Option<FileMetadata>,
    cumulative: u64,
    started_at: Option<Instant>,
    last_emit: Option<Instant>,
    rate: RateEstimator,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            metadata: None,
            cumulative: 0,
            started_at: None,
            last_emit: None,
            rate: RateEstimator::new(),
        }
    }

    /// Minimum interval between observations for a file of `total`
    /// bytes: unthrottled below 1 KiB, 200 ms below 1 MiB, 1 s above.
    fn interval(total: u64) -> Duration {
        if total < 1024 {
            Duration::ZERO
        } else if total < 1024 * 1024 {
            Duration::from_millis(200)
        } else {
            Duration::from_secs(1)
        }
    }

    /// Fold one update in; returns an observation when the throttle
    /// allows one (the completing update always passes).
    pub fn ingest(&mut self, update: ProgressUpdate, now: Instant) -> Option<ProgressObservation> {
        if let Some(meta) = update.metadata {
            self.metadata = Some(meta);
        }
        if update.new_bytes > 0 {
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
            self.cumulative += update.new_bytes;
            self.rate.record_at(now, update.new_bytes);
        }

        let meta = self.metadata.as_ref()?;
        let total = meta.size;
        let complete = self.cumulative >= total;

        if !complete
            && let Some(last) = self.last_emit
            && now.duration_since(last) < Self::interval(total)
        {
            return None;
        }
        self.last_emit = Some(now);

        let percent = if total == 0 {
            100.0
        } else {
            (self.cumulative as f64 / total as f64 * 100.0).min(100.0)
        };
        let rolling = self.rate.rate();
        Some(ProgressObservation {
            name: meta.name.clone(),
            cumulative: self.cumulative,
            total,
            percent,
            throughput: if rolling > 0.0 {
                rolling
            } else {
                self.throughput(now)
            },
        })
    }

    /// `true` once cumulative bytes reached the announced total.
    pub fn is_complete(&self) -> bool {
        match &self.metadata {
            Some(meta) => self.cumulative >= meta.size,
            None => false,
        }
    }

    /// The final summary, available once complete.
    pub fn summary(&self, now: Instant) -> Option<TransferSummary> {
        let meta = self.metadata.as_ref()?;
        if self.cumulative < meta.size {
            return None;
        }
        let duration = self
            .started_at
            .map(|t| now.duration_since(t))
            .unwrap_or(Duration::ZERO);
        Some(TransferSummary {
            name: meta.name.clone(),
            bytes: self.cumulative,
            duration,
            throughput: self.throughput(now),
            checksum: meta.checksum.clone(),
        })
    }

    fn throughput(&self, now: Instant) -> f64 {
        match self.started_at {
            Some(start) => {
                let secs = now.duration_since(start).as_secs_f64();
                if secs > 0.0 {
                    self.cumulative as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// Drive the reporter from the update channel, invoking `observer`
    /// for each throttled observation. Returns the summary when the
    /// transfer completed, or `None` when the channel closed early.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<ProgressUpdate>,
        mut observer: impl FnMut(ProgressObservation),
    ) -> Option<TransferSummary> {
        while let Some(update) = rx.recv().await {
            let now = Instant::now();
            if let Some(obs) = self.ingest(update, now) {
                observer(obs);
            }
            if self.is_complete() {
                return self.summary(Instant::now());
            }
        }
        None
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(size: u64) -> FileMetadata {
        FileMetadata {
            name: "file.bin".to_string(),
            size,
            mime_type: "application/octet-stream".to_string(),
            checksum: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                .to_string(),
        }
    }

    fn announce(size: u64) -> ProgressUpdate {
        ProgressUpdate {
            new_bytes: 0,
            metadata: Some(meta(size)),
        }
    }

    fn bytes(n: u64) -> ProgressUpdate {
        ProgressUpdate {
            new_bytes: n,
            metadata: None,
        }
    }

    #[test]
    fn large_file_throttles_to_one_second() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(10 * 1024 * 1024), t0);

        assert!(rep.ingest(bytes(1024), t0).is_some());
        // 500 ms later: suppressed.
        assert!(
            rep.ingest(bytes(1024), t0 + Duration::from_millis(500))
                .is_none()
        );
        // 1.2 s later: emitted, with cumulative counting the suppressed
        // update too.
        let obs = rep
            .ingest(bytes(1024), t0 + Duration::from_millis(1200))
            .unwrap();
        assert_eq!(obs.cumulative, 3 * 1024);
    }

    #[test]
    fn small_file_uses_200ms() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(512 * 1024), t0);

        assert!(rep.ingest(bytes(1), t0).is_some());
        assert!(
            rep.ingest(bytes(1), t0 + Duration::from_millis(100))
                .is_none()
        );
        assert!(
            rep.ingest(bytes(1), t0 + Duration::from_millis(300))
                .is_some()
        );
    }

    #[test]
    fn tiny_file_is_unthrottled() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(100), t0);

        for _ in 0..10 {
            assert!(rep.ingest(bytes(1), t0).is_some());
        }
    }

    #[test]
    fn completing_update_always_emits() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(2 * 1024 * 1024), t0);
        rep.ingest(bytes(1024 * 1024), t0);

        // Immediately afterwards, but completing: must emit at 100%.
        let obs = rep
            .ingest(bytes(1024 * 1024), t0 + Duration::from_millis(1))
            .unwrap();
        assert_eq!(obs.percent, 100.0);
        assert!(rep.is_complete());
    }

    #[test]
    fn start_time_taken_at_first_nonzero_update() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(1024 * 1024), t0);

        // First bytes arrive 5 s after the announcement; throughput is
        // measured from there, not from the announcement.
        let t1 = t0 + Duration::from_secs(5);
        rep.ingest(bytes(512 * 1024), t1);
        let obs = rep
            .ingest(bytes(512 * 1024), t1 + Duration::from_secs(1))
            .unwrap();
        assert!((obs.throughput - 1024.0 * 1024.0).abs() < 1024.0);

        let summary = rep.summary(t1 + Duration::from_secs(1)).unwrap();
        assert_eq!(summary.bytes, 1024 * 1024);
        assert_eq!(summary.duration, Duration::from_secs(1));
    }

    #[test]
    fn empty_file_summary_is_immediate() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        let obs = rep.ingest(announce(0), t0).unwrap();
        assert_eq!(obs.percent, 100.0);

        let summary = rep.summary(t0).unwrap();
        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.duration, Duration::ZERO);
    }

    #[test]
    fn no_summary_before_completion() {
        let mut rep = ProgressReporter::new();
        let t0 = Instant::now();
        rep.ingest(announce(1000), t0);
        rep.ingest(bytes(500), t0);
        assert!(rep.summary(t0).is_none());
    }

    #[tokio::test]
    async fn run_returns_summary_on_completion() {
        let (tx, rx) = progress_channel();
        tx.announce(meta(6));
        tx.offer(6);

        let mut seen = Vec::new();
        let summary = ProgressReporter::new()
            .run(rx, |obs| seen.push(obs))
            .await
            .unwrap();
        assert_eq!(summary.bytes, 6);
        assert!(!seen.is_empty());
    }

    #[tokio::test]
    async fn run_returns_none_when_channel_closes_early() {
        let (tx, rx) = progress_channel();
        tx.announce(meta(100));
        tx.offer(10);
        drop(tx);

        let summary = ProgressReporter::new().run(rx, |_| {}).await;
        assert!(summary.is_none());
    }
}

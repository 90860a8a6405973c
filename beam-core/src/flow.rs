//! Sender-side flow control.
//!
//! The transport queues outbound frames internally; unbounded queueing
//! would let a fast disk outrun a slow link and balloon memory. Before
//! each send the controller samples the channel's buffered amount and,
//! above the high watermark, parks until the transport's buffered-low
//! callback fires, a deadline passes, or the session is cancelled.
//!
//! The buffered-low callback runs on the transport's thread and must not
//! block: it signals through a capacity-1 channel with a non-blocking
//! offer, so repeated callbacks coalesce into one pending wake-up.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::DataLink;
use crate::error::BeamError;

/// How long a paused sender waits for the buffer to drain.
pub const FLOW_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wake-up handle installed in the transport's buffered-low callback.
#[derive(Debug, Clone)]
pub struct FlowSignal {
    tx: mpsc::Sender<()>,
}

impl FlowSignal {
    /// Non-blocking offer; a full slot means a wake-up is already
    /// pending and the signal coalesces.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Pauses the outbound pump while the channel buffer is above the high
/// watermark.
#[derive(Debug)]
pub struct FlowController {
    low: usize,
    high: usize,
    timeout: Duration,
    wakeup_tx: mpsc::Sender<()>,
    wakeup_rx: mpsc::Receiver<()>,
}

impl FlowController {
    /// Create a controller with the given watermarks and the default
    /// 30 s drain deadline.
    pub fn new(low: usize, high: usize) -> Self {
        Self::with_timeout(low, high, FLOW_CONTROL_TIMEOUT)
    }

    /// Create a controller with an explicit deadline (tests).
    pub fn with_timeout(low: usize, high: usize, timeout: Duration) -> Self {
        let (wakeup_tx, wakeup_rx) = mpsc::channel(1);
        Self {
            low,
            high,
            timeout,
            wakeup_tx,
            wakeup_rx,
        }
    }

    /// Threshold the transport should report buffered-low at.
    pub fn low_watermark(&self) -> usize {
        self.low
    }

    /// Buffered amount above which sends are paused.
    pub fn high_watermark(&self) -> usize {
        self.high
    }

    /// Handle for the transport's buffered-low callback.
    pub fn signal(&self) -> FlowSignal {
        FlowSignal {
            tx: self.wakeup_tx.clone(),
        }
    }

    /// Wait until the link's buffered amount is at or below the high
    /// watermark.
    ///
    /// Returns immediately when the buffer has room. Otherwise parks on
    /// the wake-up channel, re-sampling after every wake-up since the
    /// signal is only a hint.
    pub async fn admit(
        &mut self,
        link: &dyn DataLink,
        cancel: &CancellationToken,
    ) -> Result<(), BeamError> {
        while link.buffered_amount().await > self.high {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BeamError::Cancelled),
                woke = tokio::time::timeout(self.timeout, self.wakeup_rx.recv()) => {
                    match woke {
                        Ok(Some(())) => {}
                        Ok(None) => return Err(BeamError::QueueClosed),
                        Err(_) => return Err(BeamError::FlowControlTimeout(self.timeout)),
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

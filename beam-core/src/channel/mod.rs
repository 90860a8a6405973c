//! Channel driver — owns one data channel and multiplexes its traffic.
//!
//! Transport callbacks (open/message/close/error) never block; they fan
//! in to a bounded [`LinkEvent`] queue. The driver splits into two
//! background tasks over mpsc channels, the same shape the engine uses
//! everywhere: a single writer drains the outbound queue onto the link,
//! and a single reader decodes inbound frames into the state machine's
//! inbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::MessageCodec;
use crate::error::BeamError;
use crate::flow::FlowController;
use crate::message::Message;

/// How long to wait for the channel to reach the open state.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fan-in capacity for transport callbacks.
pub const LINK_EVENT_CAPACITY: usize = 100;

/// Outbound queue depth between the state machine and the pump.
pub const OUTBOUND_CAPACITY: usize = 64;

// ── DataLink ─────────────────────────────────────────────────────

/// The slice of a data channel the engine needs.
///
/// Implemented by the WebRTC wiring for production and by an in-memory
/// pair in the integration tests. State changes and inbound frames are
/// delivered out-of-band through the [`LinkEvent`] queue handed to
/// [`ChannelDriver::new`].
#[async_trait]
pub trait DataLink: Send + Sync {
    /// Queue one frame on the channel.
    async fn send(&self, frame: Bytes) -> Result<(), BeamError>;

    /// Bytes accepted by [`send`](Self::send) but not yet handed to the
    /// network.
    async fn buffered_amount(&self) -> usize;

    /// Ask the transport for a graceful close. Idempotence is the
    /// driver's concern, not the link's.
    async fn close(&self) -> Result<(), BeamError>;
}

/// Channel-state changes and inbound traffic, in callback order.
#[derive(Debug)]
pub enum LinkEvent {
    /// The channel reached the open state.
    Open,
    /// One complete frame arrived.
    Frame(Bytes),
    /// The channel closed.
    Closed,
    /// The transport reported a failure.
    Error(String),
}

/// What the driver hands to the state machine.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded protocol message.
    Message(Message),
    /// The channel closed; no further traffic will arrive.
    Closed,
    /// The driver hit a fault. A decode fault has already been reported
    /// to the peer with a best-effort ERROR.
    Faulted(BeamError),
}

// ── ChannelHandle ────────────────────────────────────────────────

/// Cheaply cloneable handle for enqueueing messages and closing.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<Message>,
    link: Arc<dyn DataLink>,
    closed: Arc<AtomicBool>,
}

impl ChannelHandle {
    /// Enqueue a message for the outbound pump.
    pub async fn send(&self, msg: Message) -> Result<(), BeamError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| BeamError::ChannelClosed)
    }

    /// Best-effort enqueue that never waits; used on abort paths where
    /// the pump may already be gone.
    pub fn offer(&self, msg: Message) {
        let _ = self.outbound.try_send(msg);
    }

    /// Close the channel gracefully. Only the first call reaches the
    /// link; later calls are no-ops.
    pub async fn close(&self) -> Result<(), BeamError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.link.close().await
    }
}

// ── ChannelDriver ────────────────────────────────────────────────

/// Owns a single data channel: waits for open, then runs the inbound
/// and outbound loops until close, fault, or cancellation.
pub struct ChannelDriver {
    link: Arc<dyn DataLink>,
    events: mpsc::Receiver<LinkEvent>,
    codec: MessageCodec,
    flow: FlowController,
    cancel: CancellationToken,
}

impl ChannelDriver {
    pub fn new(
        link: Arc<dyn DataLink>,
        events: mpsc::Receiver<LinkEvent>,
        codec: MessageCodec,
        flow: FlowController,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            events,
            codec,
            flow,
            cancel,
        }
    }

    /// Consume link events until the channel opens.
    ///
    /// Fails with `ReadyTimeout` after [`READY_TIMEOUT`], or with a
    /// transport error if the channel dies first.
    pub async fn wait_open(&mut self) -> Result<(), BeamError> {
        let cancel = self.cancel.clone();
        let events = &mut self.events;
        let opened = tokio::time::timeout(READY_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Some(LinkEvent::Open) => return Ok(()),
                    Some(LinkEvent::Frame(_)) => {
                        return Err(BeamError::Transport(
                            "frame received before channel open".into(),
                        ));
                    }
                    Some(LinkEvent::Closed) | None => return Err(BeamError::ChannelClosed),
                    Some(LinkEvent::Error(e)) => return Err(BeamError::Transport(e)),
                }
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BeamError::Cancelled),
            res = opened => match res {
                Ok(inner) => inner,
                Err(_) => Err(BeamError::ReadyTimeout(READY_TIMEOUT)),
            },
        }
    }

    /// Spawn the inbound and outbound loops.
    ///
    /// Returns the handle for enqueueing messages and the inbox the
    /// state machine reads. Dropping the handle (and its clones) closes
    /// the outbound queue and ends the pump.
    pub fn start(self) -> (ChannelHandle, mpsc::Receiver<Inbound>) {
        let ChannelDriver {
            link,
            mut events,
            codec,
            mut flow,
            cancel,
        } = self;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(LINK_EVENT_CAPACITY);

        let handle = ChannelHandle {
            outbound: outbound_tx,
            link: Arc::clone(&link),
            closed: Arc::new(AtomicBool::new(false)),
        };

        // Outbound pump: single writer to the link.
        {
            let link = Arc::clone(&link);
            let inbound_tx = inbound_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while let Some(msg) = outbound_rx.recv().await {
                    let msg_type = msg.msg_type();
                    let result = async {
                        // Pacing applies to chunk traffic; control
                        // messages (including a final best-effort
                        // ERROR) always go straight through.
                        if msg_type == crate::message::MessageType::FileData {
                            flow.admit(link.as_ref(), &cancel).await?;
                        }
                        let frame = codec.encode(&msg)?;
                        link.send(frame).await
                    }
                    .await;

                    if let Err(e) = result {
                        tracing::warn!(%msg_type, error = %e, "outbound send failed");
                        let _ = inbound_tx.send(Inbound::Faulted(e)).await;
                        break;
                    }
                }
            });
        }

        // Inbound demux: decode frames, dispatch to the state machine.
        {
            let handle = handle.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        ev = events.recv() => ev,
                    };

                    match event {
                        Some(LinkEvent::Frame(frame)) => match codec.decode(&frame) {
                            Ok(msg) => {
                                if inbound_tx.send(Inbound::Message(msg)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "inbound frame rejected");
                                handle.offer(Message::error(e.wire_reason()));
                                let _ = inbound_tx.send(Inbound::Faulted(e)).await;
                                break;
                            }
                        },
                        Some(LinkEvent::Closed) | None => {
                            let _ = inbound_tx.send(Inbound::Closed).await;
                            break;
                        }
                        Some(LinkEvent::Error(e)) => {
                            let _ = inbound_tx
                                .send(Inbound::Faulted(BeamError::Transport(e)))
                                .await;
                            break;
                        }
                        // Open after wait_open is a duplicate state
                        // notification; ignore.
                        Some(LinkEvent::Open) => {}
                    }
                }
            });
        }

        (handle, inbound_rx)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Link stub that records every sent frame.
    struct RecordingLink {
        frames: Mutex<Vec<Bytes>>,
        closes: AtomicBool,
    }

    impl RecordingLink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                closes: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataLink for RecordingLink {
        async fn send(&self, frame: Bytes) -> Result<(), BeamError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn buffered_amount(&self) -> usize {
            0
        }

        async fn close(&self) -> Result<(), BeamError> {
            self.closes.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn driver_parts(
        link: Arc<RecordingLink>,
    ) -> (ChannelDriver, mpsc::Sender<LinkEvent>, CancellationToken) {
        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let driver = ChannelDriver::new(
            link,
            event_rx,
            MessageCodec::new(1024),
            FlowController::new(512, 1024),
            cancel.clone(),
        );
        (driver, event_tx, cancel)
    }

    #[tokio::test]
    async fn wait_open_consumes_the_open_event() {
        let (mut driver, event_tx, _cancel) = driver_parts(RecordingLink::new());
        event_tx.send(LinkEvent::Open).await.unwrap();
        driver.wait_open().await.unwrap();
    }

    #[tokio::test]
    async fn wait_open_fails_on_close() {
        let (mut driver, event_tx, _cancel) = driver_parts(RecordingLink::new());
        event_tx.send(LinkEvent::Closed).await.unwrap();
        assert!(matches!(
            driver.wait_open().await,
            Err(BeamError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn wait_open_respects_cancellation() {
        let (mut driver, _event_tx, cancel) = driver_parts(RecordingLink::new());
        cancel.cancel();
        assert!(matches!(
            driver.wait_open().await,
            Err(BeamError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn outbound_messages_reach_the_link() {
        let link = RecordingLink::new();
        let (driver, _event_tx, _cancel) = driver_parts(Arc::clone(&link));
        let (handle, _inbox) = driver.start();

        handle.send(Message::ready()).await.unwrap();
        handle.send(Message::eof()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let frames = link.sent();
        assert_eq!(frames.len(), 2);

        let codec = MessageCodec::new(1024);
        assert_eq!(codec.decode(&frames[0]).unwrap(), Message::ready());
        assert_eq!(codec.decode(&frames[1]).unwrap(), Message::eof());
    }

    #[tokio::test]
    async fn inbound_frames_are_decoded_and_dispatched() {
        let (driver, event_tx, _cancel) = driver_parts(RecordingLink::new());
        let (_handle, mut inbox) = driver.start();

        let codec = MessageCodec::new(1024);
        let frame = codec.encode(&Message::ready()).unwrap();
        event_tx.send(LinkEvent::Frame(frame)).await.unwrap();

        match inbox.recv().await.unwrap() {
            Inbound::Message(msg) => assert_eq!(msg, Message::ready()),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_frame_raises_error_to_peer_and_faults() {
        let link = RecordingLink::new();
        let (driver, event_tx, _cancel) = driver_parts(Arc::clone(&link));
        let (_handle, mut inbox) = driver.start();

        event_tx
            .send(LinkEvent::Frame(Bytes::from_static(b"{garbage")))
            .await
            .unwrap();

        match inbox.recv().await.unwrap() {
            Inbound::Faulted(BeamError::MalformedMessage(_)) => {}
            other => panic!("expected a decode fault, got {other:?}"),
        }

        // The peer got a best-effort ERROR frame.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let frames = link.sent();
        assert_eq!(frames.len(), 1);
        let codec = MessageCodec::new(1024);
        let msg = codec.decode(&frames[0]).unwrap();
        assert_eq!(msg.msg_type(), crate::message::MessageType::Error);
    }

    #[tokio::test]
    async fn link_close_surfaces_as_closed() {
        let (driver, event_tx, _cancel) = driver_parts(RecordingLink::new());
        let (_handle, mut inbox) = driver.start();

        event_tx.send(LinkEvent::Closed).await.unwrap();
        assert!(matches!(inbox.recv().await.unwrap(), Inbound::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let link = RecordingLink::new();
        let (driver, _event_tx, _cancel) = driver_parts(Arc::clone(&link));
        let (handle, _inbox) = driver.start();

        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(link.closes.load(Ordering::SeqCst));
    }
}

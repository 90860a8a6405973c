//! Sender session — ordered handshake, paced streaming, completion.
//!
//! The session task is the single consumer of the channel inbox and the
//! single writer of the phase field. Disk reads run on the producer's
//! task; pacing comes from the outbound pump's flow controller, whose
//! backpressure propagates here through the bounded outbound queue.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelHandle, Inbound};
use crate::error::BeamError;
use crate::message::{FileMetadata, Message, MessageType};
use crate::state::{GRACEFUL_CLOSE_DELAY, SenderPhase, read_lock, write_lock};
use crate::transfer::producer::{ChunkEvent, FileProducer};
use crate::transfer::progress::ProgressSender;

/// Drives one outgoing transfer over an open channel.
pub struct SenderSession {
    source: PathBuf,
    chunk_size: usize,
    phase: Arc<RwLock<SenderPhase>>,
    channel: ChannelHandle,
    inbox: mpsc::Receiver<Inbound>,
    progress: ProgressSender,
    cancel: CancellationToken,
    /// Set when the peer already knows the session failed (its own
    /// ERROR/rejection, or a dead channel) so `fail` skips the
    /// best-effort ERROR.
    peer_notified: bool,
}

impl SenderSession {
    /// Build a session over an already-open channel.
    pub fn new(
        source: impl Into<PathBuf>,
        chunk_size: usize,
        channel: ChannelHandle,
        inbox: mpsc::Receiver<Inbound>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: source.into(),
            chunk_size,
            phase: Arc::new(RwLock::new(SenderPhase::Initializing)),
            channel,
            inbox,
            progress,
            cancel,
            peer_notified: false,
        }
    }

    /// Shared view of the phase for logging.
    pub fn phase_handle(&self) -> Arc<RwLock<SenderPhase>> {
        Arc::clone(&self.phase)
    }

    /// Run the session to a terminal phase.
    ///
    /// Returns the transferred file's metadata on `Completed`. The
    /// channel is closed on every path.
    pub async fn run(mut self) -> Result<FileMetadata, BeamError> {
        let result = self.drive().await;

        if let Err(e) = &result {
            self.fail(e).await;
        }
        let _ = self.channel.close().await;
        result
    }

    async fn drive(&mut self) -> Result<FileMetadata, BeamError> {
        self.transition(|p| p.channel_opened())?;

        // READY gates the metadata; the peer may still be resolving its
        // destination.
        let msg = self.next_message().await?;
        match msg.msg_type() {
            MessageType::Ready => self.transition(|p| p.ready_received())?,
            other => return Err(self.unexpected(other)),
        }

        let (metadata, mut chunks) =
            FileProducer::open(&self.source, self.chunk_size, self.cancel.child_token()).await?;
        self.channel.send(Message::metadata(&metadata)?).await?;
        self.transition(|p| p.metadata_sent())?;
        self.progress.announce(metadata.clone());

        let msg = self.next_message().await?;
        match msg.msg_type() {
            MessageType::MetadataAck if msg.is_ok() => self.transition(|p| p.ack_received())?,
            MessageType::MetadataAck => {
                self.peer_notified = true;
                return Err(BeamError::PeerError(
                    msg.error_reason().unwrap_or("metadata rejected").to_string(),
                ));
            }
            other => return Err(self.unexpected(other)),
        }

        // Chunk pump: disk chunks race against inbound traffic so a
        // peer ERROR aborts the stream promptly.
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(BeamError::Cancelled),
                inbound = self.inbox.recv() => {
                    let msg = Self::unwrap_inbound(inbound, &mut self.peer_notified)?;
                    return Err(self.unexpected(msg.msg_type()));
                }
                item = chunks.next() => match item? {
                    ChunkEvent::Data(chunk) => {
                        let len = chunk.len() as u64;
                        self.channel.send(Message::file_data(chunk)).await?;
                        self.progress.offer(len);
                    }
                    ChunkEvent::End => {
                        self.channel.send(Message::eof()).await?;
                        self.transition(|p| p.eof_sent())?;
                        break;
                    }
                },
            }
        }

        let msg = self.next_message().await?;
        match msg.msg_type() {
            MessageType::TransferComplete if msg.is_ok() => {
                self.transition(|p| p.completed())?;
                // Let the final acknowledgement drain before closing.
                tokio::time::sleep(GRACEFUL_CLOSE_DELAY).await;
                Ok(metadata)
            }
            MessageType::TransferComplete => {
                self.peer_notified = true;
                Err(BeamError::PeerError(
                    msg.error_reason().unwrap_or("transfer rejected").to_string(),
                ))
            }
            other => Err(self.unexpected(other)),
        }
    }

    /// Next protocol message, resolving channel faults, peer ERRORs and
    /// cancellation into session errors.
    async fn next_message(&mut self) -> Result<Message, BeamError> {
        let inbound = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BeamError::Cancelled),
            inbound = self.inbox.recv() => inbound,
        };
        Self::unwrap_inbound(inbound, &mut self.peer_notified)
    }

    fn unwrap_inbound(
        inbound: Option<Inbound>,
        peer_notified: &mut bool,
    ) -> Result<Message, BeamError> {
        match inbound {
            Some(Inbound::Message(msg)) if msg.msg_type() == MessageType::Error => {
                *peer_notified = true;
                Err(BeamError::PeerError(
                    msg.error_reason().unwrap_or("unspecified").to_string(),
                ))
            }
            Some(Inbound::Message(msg)) => Ok(msg),
            Some(Inbound::Closed) | None => {
                *peer_notified = true;
                Err(BeamError::ChannelClosed)
            }
            Some(Inbound::Faulted(e)) => Err(e),
        }
    }

    fn unexpected(&self, message: MessageType) -> BeamError {
        BeamError::UnexpectedMessage {
            state: read_lock(&self.phase).name(),
            message: message.wire_name(),
        }
    }

    fn transition(
        &self,
        f: impl FnOnce(&mut SenderPhase) -> Result<(), BeamError>,
    ) -> Result<(), BeamError> {
        let mut phase = write_lock(&self.phase);
        let from = *phase;
        f(&mut phase)?;
        tracing::debug!(%from, to = %*phase, "sender transition");
        Ok(())
    }

    /// Best-effort ERROR to the peer, then the terminal phase.
    async fn fail(&mut self, err: &BeamError) {
        let already_terminal = read_lock(&self.phase).is_terminal();
        if !already_terminal && !self.peer_notified && !matches!(err, BeamError::ChannelClosed) {
            self.channel.offer(Message::error(err.wire_reason()));
            // Give the pump a moment to flush the notice.
            tokio::time::sleep(GRACEFUL_CLOSE_DELAY).await;
        }

        let mut phase = write_lock(&self.phase);
        let from = *phase;
        phase.fail();
        tracing::warn!(%from, error = %err, "sender session failed");
    }
}


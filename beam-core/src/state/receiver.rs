//! Receiver session — file lifecycle, verification, acknowledgement.
//!
//! Symmetric counterpart of the sender. The session owns the one file
//! handle through [`FileConsumer`]; every exit path either finalizes it
//! or discards the partial file.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelHandle, Inbound};
use crate::error::BeamError;
use crate::message::{Message, MessageType};
use crate::state::{GRACEFUL_CLOSE_DELAY, ReceiverPhase, read_lock, write_lock};
use crate::transfer::consumer::FileConsumer;
use crate::transfer::progress::ProgressSender;

/// Drives one incoming transfer over an open channel.
pub struct ReceiverSession {
    destination: PathBuf,
    phase: Arc<RwLock<ReceiverPhase>>,
    channel: ChannelHandle,
    inbox: mpsc::Receiver<Inbound>,
    progress: ProgressSender,
    cancel: CancellationToken,
    consumer: Option<FileConsumer>,
    peer_notified: bool,
}

impl ReceiverSession {
    /// Build a session over an already-open channel.
    pub fn new(
        destination: impl Into<PathBuf>,
        channel: ChannelHandle,
        inbox: mpsc::Receiver<Inbound>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            destination: destination.into(),
            phase: Arc::new(RwLock::new(ReceiverPhase::Initializing)),
            channel,
            inbox,
            progress,
            cancel,
            consumer: None,
            peer_notified: false,
        }
    }

    /// Shared view of the phase for logging.
    pub fn phase_handle(&self) -> Arc<RwLock<ReceiverPhase>> {
        Arc::clone(&self.phase)
    }

    /// Run the session to a terminal phase.
    ///
    /// Returns the path of the verified file on `Completed`. On every
    /// other outcome any partial file has been removed and the channel
    /// closed.
    pub async fn run(mut self) -> Result<PathBuf, BeamError> {
        let result = self.drive().await;

        if let Err(e) = &result {
            self.fail(e).await;
        }
        let _ = self.channel.close().await;
        result
    }

    async fn drive(&mut self) -> Result<PathBuf, BeamError> {
        self.channel.send(Message::ready()).await?;
        self.transition(|p| p.ready_sent())?;

        // One METADATA opens the file lifecycle.
        let msg = self.next_message().await?;
        let metadata = match msg.msg_type() {
            MessageType::Metadata => msg.parse_metadata()?,
            other => return Err(self.unexpected(other)),
        };
        self.transition(|p| p.metadata_received())?;

        match FileConsumer::create(&self.destination, &metadata).await {
            Ok(consumer) => {
                self.consumer = Some(consumer);
                self.channel.send(Message::metadata_ack()).await?;
                self.transition(|p| p.consumer_ready())?;
            }
            Err(e) => {
                // The rejection reason travels in the ack itself.
                let _ = self
                    .channel
                    .send(Message::metadata_ack_error(e.wire_reason()))
                    .await;
                self.peer_notified = true;
                return Err(e);
            }
        }
        self.progress.announce(metadata);

        // Data loop: FILE_DATA until EOF.
        loop {
            let msg = self.next_message().await?;
            match msg.msg_type() {
                MessageType::FileData => {
                    let chunk = msg.into_payload();
                    let consumer = self.consumer.as_mut().ok_or(BeamError::QueueClosed)?;
                    consumer.write_chunk(&chunk).await?;
                    self.progress.offer(chunk.len() as u64);
                }
                MessageType::Eof => break,
                other => return Err(self.unexpected(other)),
            }
        }

        // Finalize: byte count and digest must match the announcement.
        let consumer = self.consumer.take().ok_or(BeamError::QueueClosed)?;
        let path = consumer.path().to_path_buf();
        match consumer.finalize().await {
            Ok(digest) => {
                self.transition(|p| p.completed())?;
                tracing::debug!(path = %path.display(), %digest, "transfer verified");
                self.channel.send(Message::transfer_complete()).await?;
                tokio::time::sleep(GRACEFUL_CLOSE_DELAY).await;
                Ok(path)
            }
            Err(e) => {
                // The file is already removed; report the failure in
                // the completion message rather than a bare ERROR.
                let _ = self
                    .channel
                    .send(Message::transfer_complete_error(e.wire_reason()))
                    .await;
                self.peer_notified = true;
                tokio::time::sleep(GRACEFUL_CLOSE_DELAY).await;
                Err(e)
            }
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
        match inbound {
            Some(Inbound::Message(msg)) if msg.msg_type() == MessageType::Error => {
                self.peer_notified = true;
                Err(BeamError::PeerError(
                    msg.error_reason().unwrap_or("unspecified").to_string(),
                ))
            }
            Some(Inbound::Message(msg)) => Ok(msg),
            Some(Inbound::Closed) | None => {
                self.peer_notified = true;
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
        f: impl FnOnce(&mut ReceiverPhase) -> Result<(), BeamError>,
    ) -> Result<(), BeamError> {
        let mut phase = write_lock(&self.phase);
        let from = *phase;
        f(&mut phase)?;
        tracing::debug!(%from, to = %*phase, "receiver transition");
        Ok(())
    }

    /// Remove any partial file, best-effort ERROR, terminal phase.
    async fn fail(&mut self, err: &BeamError) {
        if let Some(consumer) = self.consumer.take() {
            consumer.discard().await;
        }

        let already_terminal = read_lock(&self.phase).is_terminal();
        if !already_terminal && !self.peer_notified && !matches!(err, BeamError::ChannelClosed) {
            self.channel.offer(Message::error(err.wire_reason()));
            tokio::time::sleep(GRACEFUL_CLOSE_DELAY).await;
        }

        let mut phase = write_lock(&self.phase);
        let from = *phase;
        phase.fail();
        tracing::warn!(%from, error = %err, "receiver session failed");
    }
}

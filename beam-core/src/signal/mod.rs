//! Signalling orchestration — the offerer and answerer flows.
//!
//! These are the two entry points a front-end calls. Each one drives
//! the rendezvous exchange, assembles the channel driver over the
//! negotiated transport, runs the session state machine, and tears
//! everything down — the store session is deleted and the peer
//! connection closed on success and failure alike.

pub mod code;
pub mod store;

pub use code::{CODE_LENGTH, generate_code, validate_code};
pub use store::{HttpRendezvousStore, RendezvousStore};

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelDriver, LINK_EVENT_CAPACITY, READY_TIMEOUT};
use crate::codec::MessageCodec;
use crate::config::TransferConfig;
use crate::error::BeamError;
use crate::flow::FlowController;
use crate::message::FileMetadata;
use crate::state::{ReceiverSession, SenderSession};
use crate::transfer::progress::ProgressSender;
use crate::webrtc::{PeerEndpoint, attach_link};

/// Offerer flow: negotiate via the store, then stream `source`.
///
/// `on_code` runs as soon as the offer is published so the user can
/// share the code while the answer poll is still in flight.
pub async fn run_sender(
    config: &TransferConfig,
    rendezvous: &dyn RendezvousStore,
    source: &Path,
    progress: ProgressSender,
    on_code: impl FnOnce(&str),
    cancel: CancellationToken,
) -> Result<FileMetadata, BeamError> {
    config.validate()?;

    let flow = FlowController::new(config.buffered_low, config.buffered_max);
    let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);

    let endpoint = PeerEndpoint::new(config, event_tx.clone()).await?;

    // Channel before offer, so the offer negotiates it.
    let dc = endpoint.create_channel().await?;
    let link = attach_link(dc, event_tx, flow.signal(), config.buffered_low).await;

    let offer = match endpoint.offer_blob().await {
        Ok(offer) => offer,
        Err(e) => {
            let _ = endpoint.close().await;
            return Err(e);
        }
    };
    let code = match rendezvous.create_session(&offer, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            let _ = endpoint.close().await;
            return Err(e);
        }
    };
    on_code(&code);
    tracing::info!(%code, "offer published, waiting for peer");

    let result = async {
        let answer = rendezvous.wait_for_answer(&code, &cancel).await?;
        endpoint.accept_answer_blob(&answer).await?;

        let mut driver = ChannelDriver::new(
            link,
            event_rx,
            MessageCodec::new(config.chunk_size),
            flow,
            cancel.clone(),
        );
        driver.wait_open().await?;
        let (handle, inbox) = driver.start();

        SenderSession::new(
            source,
            config.chunk_size,
            handle,
            inbox,
            progress,
            cancel.clone(),
        )
        .run()
        .await
    }
    .await;

    // Cleanup must run even after user cancellation.
    let cleanup = CancellationToken::new();
    if let Err(e) = rendezvous.delete_session(&code, &cleanup).await {
        tracing::warn!(%code, error = %e, "store cleanup failed");
    }
    let _ = endpoint.close().await;

    result
}

/// Answerer flow: look up `code`, answer, then receive into `dst`.
pub async fn run_receiver(
    config: &TransferConfig,
    rendezvous: &dyn RendezvousStore,
    code: &str,
    dst: &Path,
    progress: ProgressSender,
    cancel: CancellationToken,
) -> Result<PathBuf, BeamError> {
    config.validate()?;
    validate_code(code)?;

    let flow = FlowController::new(config.buffered_low, config.buffered_max);
    let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);

    let endpoint = PeerEndpoint::new(config, event_tx.clone()).await?;
    let mut incoming = endpoint.incoming_links(event_tx, flow.signal(), config.buffered_low);

    let result = async {
        let offer = rendezvous.get_offer(code, &cancel).await?;
        let answer = endpoint.answer_blob(&offer).await?;
        rendezvous.put_answer(code, &answer, &cancel).await?;
        tracing::info!(%code, "answer published, waiting for channel");

        let link = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BeamError::Cancelled),
            link = incoming.recv() => link.ok_or(BeamError::ChannelClosed)?,
            _ = tokio::time::sleep(READY_TIMEOUT) => {
                return Err(BeamError::ReadyTimeout(READY_TIMEOUT));
            }
        };

        let mut driver = ChannelDriver::new(
            link,
            event_rx,
            MessageCodec::new(config.chunk_size),
            flow,
            cancel.clone(),
        );
        driver.wait_open().await?;
        let (handle, inbox) = driver.start();

        ReceiverSession::new(dst, handle, inbox, progress, cancel.clone())
            .run()
            .await
    }
    .await;

    let cleanup = CancellationToken::new();
    if let Err(e) = rendezvous.delete_session(code, &cleanup).await {
        tracing::warn!(%code, error = %e, "store cleanup failed");
    }
    let _ = endpoint.close().await;

    result
}

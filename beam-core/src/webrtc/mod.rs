//! WebRTC transport wiring — peer connection, data channel, SDP blobs.
//!
//! This module is the only one that touches the `webrtc` crate. It
//! adapts the callback-based transport surface onto the engine's queue
//! model: every callback does a non-blocking offer into the
//! [`LinkEvent`] queue (or the flow wake-up) and returns immediately.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::sync::mpsc;

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::channel::{DataLink, LinkEvent};
use crate::config::TransferConfig;
use crate::error::BeamError;
use crate::flow::FlowSignal;

/// Label of the single data channel per session.
pub const CHANNEL_LABEL: &str = "beam-transfer";

/// How long to wait for ICE candidate gathering before shipping the
/// description with whatever has been gathered.
const GATHERING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

// ── SDP blob codec ───────────────────────────────────────────────

/// Base64-wrapped JSON encoding of a session description, the blob
/// format carried through the rendezvous store.
pub fn encode_description(desc: &RTCSessionDescription) -> Result<String, BeamError> {
    let json = serde_json::to_vec(desc)
        .map_err(|e| BeamError::MalformedDescription(e.to_string()))?;
    Ok(BASE64.encode(json))
}

/// Decode a blob produced by [`encode_description`].
pub fn decode_description(blob: &str) -> Result<RTCSessionDescription, BeamError> {
    let json = BASE64
        .decode(blob.trim())
        .map_err(|e| BeamError::MalformedDescription(format!("bad base64: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| BeamError::MalformedDescription(e.to_string()))
}

// ── WebRtcLink ───────────────────────────────────────────────────

/// [`DataLink`] over one `RTCDataChannel`.
pub struct WebRtcLink {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataLink for WebRtcLink {
    async fn send(&self, frame: Bytes) -> Result<(), BeamError> {
        self.dc
            .send(&frame)
            .await
            .map(|_| ())
            .map_err(|e| BeamError::Transport(e.to_string()))
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn close(&self) -> Result<(), BeamError> {
        self.dc
            .close()
            .await
            .map_err(|e| BeamError::Transport(e.to_string()))
    }
}

/// Register all channel callbacks and return the link.
///
/// Callbacks fan in to `events` with non-blocking offers; the
/// buffered-low callback signals the flow controller through its
/// coalescing channel.
pub async fn attach_link(
    dc: Arc<RTCDataChannel>,
    events: mpsc::Sender<LinkEvent>,
    flow_signal: FlowSignal,
    buffered_low: usize,
) -> Arc<WebRtcLink> {
    {
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.try_send(LinkEvent::Open);
            })
        }));
    }
    {
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.try_send(LinkEvent::Frame(msg.data));
            })
        }));
    }
    {
        let events = events.clone();
        dc.on_close(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.try_send(LinkEvent::Closed);
            })
        }));
    }
    {
        let events = events.clone();
        dc.on_error(Box::new(move |err| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.try_send(LinkEvent::Error(err.to_string()));
            })
        }));
    }

    dc.set_buffered_amount_low_threshold(buffered_low).await;
    dc.on_buffered_amount_low(Box::new(move || {
        flow_signal.notify();
        Box::pin(async {})
    }))
    .await;

    Arc::new(WebRtcLink { dc })
}

// ── PeerEndpoint ─────────────────────────────────────────────────

/// One peer connection and its offer/answer helpers.
pub struct PeerEndpoint {
    pc: Arc<RTCPeerConnection>,
}

impl PeerEndpoint {
    /// Build the API stack and the peer connection, wiring connection
    /// state changes into the event queue.
    pub async fn new(
        config: &TransferConfig,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Self, BeamError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                tracing::debug!(%state, "peer connection state");
                match state {
                    RTCPeerConnectionState::Failed => {
                        let _ = events
                            .try_send(LinkEvent::Error("peer connection failed".to_string()));
                    }
                    RTCPeerConnectionState::Closed => {
                        let _ = events.try_send(LinkEvent::Closed);
                    }
                    _ => {}
                }
            })
        }));

        Ok(Self { pc })
    }

    /// Create the transfer channel, ordered and reliable.
    ///
    /// The offerer calls this before creating the offer so the channel
    /// is part of the negotiated description.
    pub async fn create_channel(&self) -> Result<Arc<RTCDataChannel>, BeamError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        Ok(self.pc.create_data_channel(CHANNEL_LABEL, Some(init)).await?)
    }

    /// Produce the local offer blob after candidate gathering.
    pub async fn offer_blob(&self) -> Result<String, BeamError> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = tokio::time::timeout(GATHERING_TIMEOUT, gathered.recv()).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| BeamError::Transport("no local description".to_string()))?;
        encode_description(&local)
    }

    /// Apply the peer's answer blob.
    pub async fn accept_answer_blob(&self, blob: &str) -> Result<(), BeamError> {
        let answer = decode_description(blob)?;
        Ok(self.pc.set_remote_description(answer).await?)
    }

    /// Apply the peer's offer blob and produce the local answer blob.
    pub async fn answer_blob(&self, offer_blob: &str) -> Result<String, BeamError> {
        let offer = decode_description(offer_blob)?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = tokio::time::timeout(GATHERING_TIMEOUT, gathered.recv()).await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| BeamError::Transport("no local description".to_string()))?;
        encode_description(&local)
    }

    /// Hand every announced data channel to the caller, fully attached.
    ///
    /// The answerer waits on the returned receiver; attachment happens
    /// inside the callback so the open event cannot be missed.
    pub fn incoming_links(
        &self,
        events: mpsc::Sender<LinkEvent>,
        flow_signal: FlowSignal,
        buffered_low: usize,
    ) -> mpsc::Receiver<Arc<WebRtcLink>> {
        let (tx, rx) = mpsc::channel(1);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let flow_signal = flow_signal.clone();
            let tx = tx.clone();
            Box::pin(async move {
                tracing::debug!(label = dc.label(), "data channel announced");
                let link = attach_link(dc, events, flow_signal, buffered_low).await;
                let _ = tx.send(link).await;
            })
        }));
        rx
    }

    /// Close the peer connection.
    pub async fn close(&self) -> Result<(), BeamError> {
        Ok(self.pc.close().await?)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    #[test]
    fn description_blob_roundtrip() {
        let desc = RTCSessionDescription::offer(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string(),
        )
        .unwrap();
        let blob = encode_description(&desc).unwrap();
        // The blob must be opaque: no raw SDP leaking through.
        assert!(!blob.contains("v=0"));

        let decoded = decode_description(&blob).unwrap();
        assert_eq!(decoded.sdp, desc.sdp);
        assert_eq!(decoded.sdp_type, desc.sdp_type);
    }

    #[test]
    fn garbage_blobs_rejected() {
        assert!(matches!(
            decode_description("%%%not-base64%%%"),
            Err(BeamError::MalformedDescription(_))
        ));
        let not_json = BASE64.encode(b"plain text");
        assert!(matches!(
            decode_description(&not_json),
            Err(BeamError::MalformedDescription(_))
        ));
    }
}

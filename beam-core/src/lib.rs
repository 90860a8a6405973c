//! # beam-core
//!
//! Transfer engine for direct peer-to-peer file transfer over a single
//! ordered, reliable WebRTC data channel.
//!
//! This crate contains:
//! - **Messages**: `Message`, `MessageType`, `FileMetadata` — the wire
//!   taxonomy
//! - **Codec**: `MessageCodec` — one JSON record per data-channel send
//! - **Transfer**: `FileProducer` / `FileConsumer` with SHA-256
//!   integrity, plus throttled progress reporting
//! - **Flow**: `FlowController` — buffered-amount backpressure
//! - **Channel**: `ChannelDriver` over the `DataLink` trait
//! - **State**: `SenderSession` / `ReceiverSession` state machines
//! - **Signal**: rendezvous-store exchange and the offerer/answerer
//!   flows
//! - **Error**: `BeamError` — typed, `thiserror`-based error hierarchy

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod message;
pub mod signal;
pub mod state;
pub mod transfer;
pub mod webrtc;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{ChannelDriver, ChannelHandle, DataLink, Inbound, LinkEvent};
pub use codec::{MAX_CONTROL_PAYLOAD, MessageCodec};
pub use config::TransferConfig;
pub use error::{BeamError, ErrorKind};
pub use flow::{FlowController, FlowSignal};
pub use message::{FileMetadata, Message, MessageType};
pub use signal::{HttpRendezvousStore, RendezvousStore, run_receiver, run_sender, validate_code};
pub use state::{ReceiverPhase, ReceiverSession, SenderPhase, SenderSession};
pub use transfer::{
    FileConsumer, FileProducer, ProgressReporter, ProgressSender, TransferSummary,
    progress_channel,
};

//! Session state machines for both transfer roles.
//!
//! The phase enums model the full lifecycle with validated transitions
//! that return `Result` instead of panicking; an out-of-order transition
//! is a protocol violation. The session drivers in [`sender`] and
//! [`receiver`] are the single writers of their phase; any reader (for
//! logging) takes the read side of the lock.

mod receiver;
mod sender;

pub use receiver::ReceiverSession;
pub use sender::SenderSession;

use crate::error::BeamError;

/// Delay between the final acknowledgement and the graceful close, so
/// the last frames drain before the channel goes down.
pub(crate) const GRACEFUL_CLOSE_DELAY: std::time::Duration =
    std::time::Duration::from_millis(100);

/// Poisoning cannot be handled meaningfully here; recover the guard.
pub(crate) fn read_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ── SenderPhase ──────────────────────────────────────────────────

/// Sender lifecycle.
///
/// ```text
/// Initializing ─► WaitingForReady ─► SendingMetadata ─► WaitingForMetadataAck
///                                                               │
///      Completed ◄─ WaitingForCompletion ◄─ TransferringData ◄──┘
/// ```
///
/// `Error` is terminal and reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderPhase {
    #[default]
    Initializing,
    WaitingForReady,
    SendingMetadata,
    WaitingForMetadataAck,
    TransferringData,
    WaitingForCompletion,
    Completed,
    Error,
}

impl std::fmt::Display for SenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl SenderPhase {
    /// Static phase name, also used in protocol-violation diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::WaitingForReady => "WaitingForReady",
            Self::SendingMetadata => "SendingMetadata",
            Self::WaitingForMetadataAck => "WaitingForMetadataAck",
            Self::TransferringData => "TransferringData",
            Self::WaitingForCompletion => "WaitingForCompletion",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// `true` in `Completed` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Channel reached open. Valid from: `Initializing`.
    pub fn channel_opened(&mut self) -> Result<(), BeamError> {
        match self {
            Self::Initializing => {
                *self = Self::WaitingForReady;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "channel open outside Initializing",
            )),
        }
    }

    /// READY arrived. Valid from: `WaitingForReady`.
    pub fn ready_received(&mut self) -> Result<(), BeamError> {
        match self {
            Self::WaitingForReady => {
                *self = Self::SendingMetadata;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "READY outside WaitingForReady",
            )),
        }
    }

    /// METADATA handed to the channel. Valid from: `SendingMetadata`.
    pub fn metadata_sent(&mut self) -> Result<(), BeamError> {
        match self {
            Self::SendingMetadata => {
                *self = Self::WaitingForMetadataAck;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "metadata send outside SendingMetadata",
            )),
        }
    }

    /// Positive METADATA_ACK arrived. Valid from: `WaitingForMetadataAck`.
    pub fn ack_received(&mut self) -> Result<(), BeamError> {
        match self {
            Self::WaitingForMetadataAck => {
                *self = Self::TransferringData;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "METADATA_ACK outside WaitingForMetadataAck",
            )),
        }
    }

    /// Producer hit end of stream, EOF sent. Valid from:
    /// `TransferringData`.
    pub fn eof_sent(&mut self) -> Result<(), BeamError> {
        match self {
            Self::TransferringData => {
                *self = Self::WaitingForCompletion;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "EOF outside TransferringData",
            )),
        }
    }

    /// Positive TRANSFER_COMPLETE arrived. Valid from:
    /// `WaitingForCompletion`.
    pub fn completed(&mut self) -> Result<(), BeamError> {
        match self {
            Self::WaitingForCompletion => {
                *self = Self::Completed;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "TRANSFER_COMPLETE outside WaitingForCompletion",
            )),
        }
    }

    /// Force the terminal `Error` phase, from any state.
    pub fn fail(&mut self) {
        *self = Self::Error;
    }
}

// ── ReceiverPhase ────────────────────────────────────────────────

/// Receiver lifecycle.
///
/// ```text
/// Initializing ─► Ready ─► PreparingFile ─► ReceivingData ─► Completed
/// ```
///
/// `Error` is terminal and reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverPhase {
    #[default]
    Initializing,
    Ready,
    PreparingFile,
    ReceivingData,
    Completed,
    Error,
}

impl std::fmt::Display for ReceiverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ReceiverPhase {
    /// Static phase name, also used in protocol-violation diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::PreparingFile => "PreparingFile",
            Self::ReceivingData => "ReceivingData",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// `true` in `Completed` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Channel open, READY sent. Valid from: `Initializing`.
    pub fn ready_sent(&mut self) -> Result<(), BeamError> {
        match self {
            Self::Initializing => {
                *self = Self::Ready;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "READY send outside Initializing",
            )),
        }
    }

    /// METADATA arrived and validated. Valid from: `Ready`.
    pub fn metadata_received(&mut self) -> Result<(), BeamError> {
        match self {
            Self::Ready => {
                *self = Self::PreparingFile;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation("METADATA outside Ready")),
        }
    }

    /// Consumer ready, METADATA_ACK sent. Valid from: `PreparingFile`.
    pub fn consumer_ready(&mut self) -> Result<(), BeamError> {
        match self {
            Self::PreparingFile => {
                *self = Self::ReceivingData;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "consumer ready outside PreparingFile",
            )),
        }
    }

    /// EOF arrived and verification passed. Valid from: `ReceivingData`.
    pub fn completed(&mut self) -> Result<(), BeamError> {
        match self {
            Self::ReceivingData => {
                *self = Self::Completed;
                Ok(())
            }
            _ => Err(BeamError::ProtocolViolation(
                "EOF outside ReceivingData",
            )),
        }
    }

    /// Force the terminal `Error` phase, from any state.
    pub fn fail(&mut self) {
        *self = Self::Error;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_happy_path() {
        let mut phase = SenderPhase::default();
        assert_eq!(phase, SenderPhase::Initializing);

        phase.channel_opened().unwrap();
        phase.ready_received().unwrap();
        phase.metadata_sent().unwrap();
        phase.ack_received().unwrap();
        phase.eof_sent().unwrap();
        phase.completed().unwrap();
        assert!(phase.is_terminal());
        assert_eq!(phase, SenderPhase::Completed);
    }

    #[test]
    fn sender_invalid_transitions_rejected() {
        let mut phase = SenderPhase::Initializing;
        assert!(phase.ready_received().is_err());
        assert!(phase.ack_received().is_err());
        assert!(phase.completed().is_err());

        let mut phase = SenderPhase::TransferringData;
        assert!(phase.channel_opened().is_err());
        assert!(phase.metadata_sent().is_err());
    }

    #[test]
    fn sender_fail_from_any_state() {
        for mut phase in [
            SenderPhase::Initializing,
            SenderPhase::WaitingForReady,
            SenderPhase::TransferringData,
            SenderPhase::WaitingForCompletion,
        ] {
            phase.fail();
            assert_eq!(phase, SenderPhase::Error);
            assert!(phase.is_terminal());
        }
    }

    #[test]
    fn receiver_happy_path() {
        let mut phase = ReceiverPhase::default();
        phase.ready_sent().unwrap();
        phase.metadata_received().unwrap();
        phase.consumer_ready().unwrap();
        phase.completed().unwrap();
        assert_eq!(phase, ReceiverPhase::Completed);
    }

    #[test]
    fn receiver_rejects_second_metadata() {
        let mut phase = ReceiverPhase::Ready;
        phase.metadata_received().unwrap();
        phase.consumer_ready().unwrap();
        // Second METADATA arrives while ReceivingData.
        assert!(matches!(
            phase.metadata_received(),
            Err(BeamError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn receiver_rejects_data_before_metadata() {
        // FILE_DATA is only legal in ReceivingData; the completed()
        // transition models the EOF boundary.
        let mut phase = ReceiverPhase::Ready;
        assert!(phase.completed().is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(SenderPhase::WaitingForMetadataAck.to_string(), "WaitingForMetadataAck");
        assert_eq!(ReceiverPhase::PreparingFile.to_string(), "PreparingFile");
    }
}

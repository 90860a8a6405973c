//! Domain-specific error types for the beam transfer engine.
//!
//! All fallible operations return `Result<T, BeamError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for a beam session.
#[derive(Debug, Error)]
pub enum BeamError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A received frame could not be parsed as a wire message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The `type` field did not name any known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message arrived in a state that does not accept it.
    #[error("unexpected {message} in state {state}")]
    UnexpectedMessage {
        state: &'static str,
        message: &'static str,
    },

    /// A state transition was attempted out of order.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The metadata file name contains path separators or parent
    /// references.
    #[error("unsafe file name: {0:?}")]
    UnsafeFileName(String),

    /// The peer reported a failure through an ERROR message.
    #[error("peer error: {0}")]
    PeerError(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The peer connection or data channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The data channel did not open within the deadline.
    #[error("ready timeout after {0:?}")]
    ReadyTimeout(Duration),

    /// The outbound buffer did not drain within the deadline.
    #[error("flow control timeout after {0:?}")]
    FlowControlTimeout(Duration),

    /// The data channel closed while traffic was still expected.
    #[error("channel closed")]
    ChannelClosed,

    // ── Signalling Errors ────────────────────────────────────────
    /// The rendezvous store was unreachable or rejected a request.
    #[error("signalling error: {0}")]
    Signalling(String),

    /// No answer appeared in the store within the polling budget.
    #[error("timed out waiting for peer answer")]
    AnswerTimeout,

    /// The shared code is not 8 alphanumeric characters.
    #[error("invalid code: {0:?}")]
    InvalidCode(String),

    /// A session-description blob could not be decoded.
    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    // ── Local Errors ─────────────────────────────────────────────
    /// Local disk read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The received file digest does not match the announced checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The received byte count does not match the announced size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Bad arguments or an unusable source/destination path.
    #[error("{0}")]
    User(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The session was interrupted by the user.
    #[error("cancelled")]
    Cancelled,

    /// An mpsc channel was closed unexpectedly.
    #[error("internal queue closed")]
    QueueClosed,
}

/// Coarse classification used for exit codes and the final output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Config,
    Signalling,
    Transport,
    Protocol,
    Io,
    Integrity,
    Cancelled,
}

impl ErrorKind {
    /// Lowercase label used as the prefix of the final error line.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Config => "config",
            Self::Signalling => "signalling",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Io => "io",
            Self::Integrity => "integrity",
            Self::Cancelled => "cancelled",
        }
    }

    /// Process exit code: 1 for user/config mistakes, 2 for everything
    /// that went wrong past validation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::User | Self::Config => 1,
            _ => 2,
        }
    }
}

impl BeamError {
    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage(_)
            | Self::UnknownMessageType(_)
            | Self::PayloadTooLarge { .. }
            | Self::UnexpectedMessage { .. }
            | Self::ProtocolViolation(_)
            | Self::UnsafeFileName(_)
            | Self::PeerError(_) => ErrorKind::Protocol,

            Self::Transport(_)
            | Self::ReadyTimeout(_)
            | Self::FlowControlTimeout(_)
            | Self::ChannelClosed
            | Self::QueueClosed => ErrorKind::Transport,

            Self::Signalling(_)
            | Self::AnswerTimeout
            | Self::InvalidCode(_)
            | Self::MalformedDescription(_) => ErrorKind::Signalling,

            Self::Io(_) => ErrorKind::Io,

            Self::ChecksumMismatch { .. } | Self::SizeMismatch { .. } => ErrorKind::Integrity,

            Self::User(_) => ErrorKind::User,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short reason suitable for the wire `error` field of an ERROR or
    /// rejection message.
    pub fn wire_reason(&self) -> String {
        match self {
            Self::ChecksumMismatch { .. } => "checksum mismatch".to_string(),
            Self::SizeMismatch { .. } => "size mismatch".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BeamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BeamError::QueueClosed
    }
}

impl From<serde_json::Error> for BeamError {
    fn from(e: serde_json::Error) -> Self {
        BeamError::MalformedMessage(e.to_string())
    }
}

impl From<webrtc::Error> for BeamError {
    fn from(e: webrtc::Error) -> Self {
        BeamError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = BeamError::PayloadTooLarge {
            size: 2048,
            max: 1024,
        };
        assert!(e.to_string().contains("2048"));
        assert!(e.to_string().contains("1024"));

        let e = BeamError::UnexpectedMessage {
            state: "Ready",
            message: "FILE_DATA",
        };
        assert!(e.to_string().contains("FILE_DATA"));
        assert!(e.to_string().contains("Ready"));
    }

    #[test]
    fn kinds_and_exit_codes() {
        assert_eq!(
            BeamError::User("no such file".into()).kind().exit_code(),
            1
        );
        assert_eq!(BeamError::Config("bad".into()).kind().exit_code(), 1);
        assert_eq!(BeamError::ChannelClosed.kind().exit_code(), 2);
        assert_eq!(
            BeamError::ChecksumMismatch {
                expected: "aa".into(),
                actual: "bb".into(),
            }
            .kind(),
            ErrorKind::Integrity
        );
        assert_eq!(BeamError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ErrorKind::Protocol.label(), "protocol");
        assert_eq!(ErrorKind::Integrity.label(), "integrity");
    }

    #[test]
    fn wire_reason_is_short() {
        let e = BeamError::ChecksumMismatch {
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        };
        assert_eq!(e.wire_reason(), "checksum mismatch");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: BeamError = io_err.into();
        assert!(matches!(e, BeamError::Io(_)));
        assert_eq!(e.kind(), ErrorKind::Io);
    }
}

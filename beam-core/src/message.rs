//! Protocol message taxonomy and the per-transfer file metadata.
//!
//! One [`Message`] travels per data-channel send. Control messages carry
//! little or no payload; FILE_DATA carries one chunk of raw file bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BeamError;

/// The seven message types of the transfer protocol.
///
/// Direction and payload semantics:
///
/// | Type             | Dir  | Payload                      |
/// |------------------|------|------------------------------|
/// | READY            | R→S  | none                         |
/// | METADATA         | S→R  | JSON-encoded [`FileMetadata`]|
/// | METADATA_ACK     | R→S  | none; `error` on rejection   |
/// | FILE_DATA        | S→R  | raw chunk bytes              |
/// | EOF              | S→R  | none                         |
/// | TRANSFER_COMPLETE| R→S  | none; `error` on failure     |
/// | ERROR            | both | `error` carries the reason   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ready,
    Metadata,
    MetadataAck,
    FileData,
    Eof,
    TransferComplete,
    Error,
}

impl MessageType {
    /// The `type` string used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Metadata => "METADATA",
            Self::MetadataAck => "METADATA_ACK",
            Self::FileData => "FILE_DATA",
            Self::Eof => "EOF",
            Self::TransferComplete => "TRANSFER_COMPLETE",
            Self::Error => "ERROR",
        }
    }

    /// Parse a wire `type` string.
    pub fn from_wire_name(name: &str) -> Result<Self, BeamError> {
        match name {
            "READY" => Ok(Self::Ready),
            "METADATA" => Ok(Self::Metadata),
            "METADATA_ACK" => Ok(Self::MetadataAck),
            "FILE_DATA" => Ok(Self::FileData),
            "EOF" => Ok(Self::Eof),
            "TRANSFER_COMPLETE" => Ok(Self::TransferComplete),
            "ERROR" => Ok(Self::Error),
            other => Err(BeamError::UnknownMessageType(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ── Message ──────────────────────────────────────────────────────

/// A single protocol message: tagged union of `{type, payload?, error?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    msg_type: MessageType,
    payload: Bytes,
    error: Option<String>,
}

impl Message {
    // ── Constructors ─────────────────────────────────────────────

    /// READY — receiver is listening and wants metadata.
    pub fn ready() -> Self {
        Self::control(MessageType::Ready)
    }

    /// METADATA carrying the JSON-encoded file description.
    pub fn metadata(meta: &FileMetadata) -> Result<Self, BeamError> {
        let payload = serde_json::to_vec(meta)?;
        Ok(Self {
            msg_type: MessageType::Metadata,
            payload: Bytes::from(payload),
            error: None,
        })
    }

    /// METADATA_ACK accepting the transfer.
    pub fn metadata_ack() -> Self {
        Self::control(MessageType::MetadataAck)
    }

    /// METADATA_ACK rejecting the transfer.
    pub fn metadata_ack_error(reason: impl Into<String>) -> Self {
        Self::control(MessageType::MetadataAck).with_error(reason)
    }

    /// FILE_DATA carrying one chunk of raw file bytes.
    pub fn file_data(chunk: Bytes) -> Self {
        Self {
            msg_type: MessageType::FileData,
            payload: chunk,
            error: None,
        }
    }

    /// EOF — no more chunks follow.
    pub fn eof() -> Self {
        Self::control(MessageType::Eof)
    }

    /// TRANSFER_COMPLETE confirming successful verification.
    pub fn transfer_complete() -> Self {
        Self::control(MessageType::TransferComplete)
    }

    /// TRANSFER_COMPLETE reporting a verification failure.
    pub fn transfer_complete_error(reason: impl Into<String>) -> Self {
        Self::control(MessageType::TransferComplete).with_error(reason)
    }

    /// ERROR aborting the session.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::control(MessageType::Error).with_error(reason)
    }

    /// Reassemble a message from its decoded wire parts.
    pub(crate) fn from_parts(
        msg_type: MessageType,
        payload: Bytes,
        error: Option<String>,
    ) -> Self {
        Self {
            msg_type,
            payload,
            error,
        }
    }

    fn control(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Bytes::new(),
            error: None,
        }
    }

    fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The wire `error` field, set on rejections and aborts.
    pub fn error_reason(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `true` when no `error` field is set (ack/completion succeeded).
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Decode a METADATA payload.
    pub fn parse_metadata(&self) -> Result<FileMetadata, BeamError> {
        let meta: FileMetadata = serde_json::from_slice(&self.payload)?;
        meta.validate()?;
        Ok(meta)
    }
}

// ── FileMetadata ─────────────────────────────────────────────────

/// Wire entity emitted once per transfer, before any FILE_DATA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Basename only — never a path.
    pub name: String,

    /// Total file size in bytes, snapshotted at open.
    pub size: u64,

    /// MIME type, `application/octet-stream` when unknown.
    pub mime_type: String,

    /// Lowercase hex SHA-256 of the entire file contents.
    pub checksum: String,
}

impl FileMetadata {
    /// Structural checks applied on both ends: non-empty name and a
    /// well-formed digest. Path safety is enforced separately by the
    /// consumer before touching the filesystem.
    pub fn validate(&self) -> Result<(), BeamError> {
        if self.name.is_empty() {
            return Err(BeamError::UnsafeFileName(self.name.clone()));
        }
        if self.checksum.len() != 64
            || !self
                .checksum
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(BeamError::MalformedMessage(format!(
                "checksum is not a lowercase hex sha-256 digest: {:?}",
                self.checksum
            )));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

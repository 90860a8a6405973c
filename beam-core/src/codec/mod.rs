//! Wire codec — one self-describing JSON record per data-channel send.
//!
//! A message is serialised as a UTF-8 JSON object with keys `type`,
//! `payload` (base64, present only when non-empty) and `error` (present
//! only when set). The data channel preserves message boundaries, so no
//! length framing is needed; the record is the frame.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BeamError;
use crate::message::{Message, MessageType};

/// Hard cap on control-message payloads (1 MiB).
pub const MAX_CONTROL_PAYLOAD: usize = 1024 * 1024;

/// Slack for the JSON keys, quoting and a short error string.
const FRAME_OVERHEAD: usize = 256;

/// The JSON shape of a frame.
#[derive(Serialize, Deserialize)]
struct WireMessage<'a> {
    #[serde(rename = "type")]
    msg_type: std::borrow::Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<std::borrow::Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<std::borrow::Cow<'a, str>>,
}

/// Stateless codec configured with the FILE_DATA payload cap.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    /// Maximum FILE_DATA payload in bytes (the configured chunk size).
    max_data_payload: usize,
}

impl MessageCodec {
    pub fn new(max_data_payload: usize) -> Self {
        Self { max_data_payload }
    }

    /// Largest payload this codec accepts for the given type.
    fn payload_cap(&self, msg_type: MessageType) -> usize {
        match msg_type {
            MessageType::FileData => self.max_data_payload,
            _ => MAX_CONTROL_PAYLOAD,
        }
    }

    /// Largest frame that could carry an in-cap payload.
    fn frame_cap(&self) -> usize {
        let payload_cap = self.max_data_payload.max(MAX_CONTROL_PAYLOAD);
        base64_len(payload_cap) + FRAME_OVERHEAD
    }

    /// Serialise a message into one wire frame.
    pub fn encode(&self, msg: &Message) -> Result<Bytes, BeamError> {
        let cap = self.payload_cap(msg.msg_type());
        if msg.payload().len() > cap {
            return Err(BeamError::PayloadTooLarge {
                size: msg.payload().len(),
                max: cap,
            });
        }

        let payload = if msg.payload().is_empty() {
            None
        } else {
            Some(BASE64.encode(msg.payload()).into())
        };
        let wire = WireMessage {
            msg_type: msg.msg_type().wire_name().into(),
            payload,
            error: msg.error_reason().map(Into::into),
        };
        let bytes = serde_json::to_vec(&wire)?;
        Ok(Bytes::from(bytes))
    }

    /// Parse one wire frame back into a message.
    pub fn decode(&self, frame: &[u8]) -> Result<Message, BeamError> {
        if frame.len() > self.frame_cap() {
            return Err(BeamError::PayloadTooLarge {
                size: frame.len(),
                max: self.frame_cap(),
            });
        }

        let wire: WireMessage<'_> = serde_json::from_slice(frame)?;
        let msg_type = MessageType::from_wire_name(&wire.msg_type)?;

        let payload = match wire.payload {
            Some(encoded) => {
                let raw = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| BeamError::MalformedMessage(format!("bad base64 payload: {e}")))?;
                Bytes::from(raw)
            }
            None => Bytes::new(),
        };

        let cap = self.payload_cap(msg_type);
        if payload.len() > cap {
            return Err(BeamError::PayloadTooLarge {
                size: payload.len(),
                max: cap,
            });
        }

        Ok(Message::from_parts(
            msg_type,
            payload,
            wire.error.map(|e| e.into_owned()),
        ))
    }
}

/// Encoded size of `n` bytes in standard base64 (padded).
fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FileMetadata;

    fn codec() -> MessageCodec {
        MessageCodec::new(1024)
    }

    #[test]
    fn control_roundtrip() {
        let c = codec();
        for msg in [
            Message::ready(),
            Message::metadata_ack(),
            Message::eof(),
            Message::transfer_complete(),
            Message::error("boom"),
            Message::metadata_ack_error("rejected"),
            Message::transfer_complete_error("checksum mismatch"),
        ] {
            let frame = c.encode(&msg).unwrap();
            let decoded = c.decode(&frame).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn file_data_roundtrip() {
        let c = codec();
        let msg = Message::file_data(Bytes::from(vec![0xAB; 1024]));
        let decoded = c.decode(&c.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn metadata_roundtrip() {
        let c = codec();
        let meta = FileMetadata {
            name: "data.bin".into(),
            size: 3 * 1024 * 1024,
            mime_type: "application/octet-stream".into(),
            checksum: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".into(),
        };
        let msg = Message::metadata(&meta).unwrap();
        let decoded = c.decode(&c.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.parse_metadata().unwrap(), meta);
    }

    #[test]
    fn empty_payload_is_omitted_from_the_frame() {
        let frame = codec().encode(&Message::ready()).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(!text.contains("payload"));
        assert!(!text.contains("error"));
    }

    #[test]
    fn oversize_chunk_rejected_on_encode() {
        let c = codec();
        let msg = Message::file_data(Bytes::from(vec![0u8; 1025]));
        assert!(matches!(
            c.encode(&msg),
            Err(BeamError::PayloadTooLarge { size: 1025, .. })
        ));
    }

    #[test]
    fn oversize_chunk_rejected_on_decode() {
        // Hand-build a frame whose FILE_DATA payload exceeds the cap.
        let inner = BASE64.encode(vec![0u8; 2048]);
        let frame = format!(r#"{{"type":"FILE_DATA","payload":"{inner}"}}"#);
        assert!(matches!(
            codec().decode(frame.as_bytes()),
            Err(BeamError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            codec().decode(b"{not json"),
            Err(BeamError::MalformedMessage(_))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            codec().decode(br#"{"type":"PING"}"#),
            Err(BeamError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn bad_base64_rejected() {
        assert!(matches!(
            codec().decode(br#"{"type":"FILE_DATA","payload":"@@@"}"#),
            Err(BeamError::MalformedMessage(_))
        ));
    }

    #[test]
    fn oversize_frame_rejected_before_parsing() {
        let c = codec();
        let huge = vec![b'x'; c.frame_cap() + 1];
        assert!(matches!(
            c.decode(&huge),
            Err(BeamError::PayloadTooLarge { .. })
        ));
    }
}

//! Codec trait and implementations for turning [`WireMessage`]s into frames.
//!
//! A codec maps between the typed message and the single string that one
//! transport frame carries. Two are provided:
//!
//! - [`LegacyCodec`]: sentinel-prefixed strings, wire compatible with the
//!   legacy chat peers.
//! - [`JsonCodec`]: an explicitly tagged JSON object per frame, which removes
//!   the ambiguity between chat text and control payloads.
//!
//! Decoding is total. A frame that doesn't match any known shape is chat
//! text, never an error.

use crate::legacy;
use crate::{MessageKind, PresenceKind, ProtocolError, WireMessage};

/// Prefix the legacy format uses for relay-originated notices.
pub const SERVER_NOTICE_PREFIX: &str = "[Server] ";

/// Converts [`WireMessage`]s to frames and back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task on the relay.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a message into one frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the format cannot represent the
    /// message.
    fn encode(&self, message: &WireMessage) -> Result<String, ProtocolError>;

    /// Parses one frame. Unrecognised frames decode as chat.
    fn decode(&self, frame: &str) -> WireMessage;

    /// Sniffs the kind of a frame without building the message.
    fn classify(&self, frame: &str) -> MessageKind {
        self.decode(frame).kind()
    }
}

// ---------------------------------------------------------------------------
// LegacyCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that speaks the sentinel-prefixed string format.
///
/// `Rejected` has no sentinel of its own, so it goes out as a chat line
/// starting with `[Server] `, which is what legacy relays showed
/// users. It decodes back as chat.
///
/// ```rust
/// use chatrelay_protocol::{Codec, LegacyCodec, WireMessage};
///
/// let codec = LegacyCodec;
/// let frame = codec.encode(&WireMessage::joined("Bob")).unwrap();
/// assert_eq!(frame, "$$_U_ADD_USER_$$»Bob");
/// assert_eq!(codec.decode(&frame), WireMessage::joined("Bob"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

impl Codec for LegacyCodec {
    fn encode(&self, message: &WireMessage) -> Result<String, ProtocolError> {
        Ok(match message {
            WireMessage::Roster { names } => legacy::encode_roster(names),
            WireMessage::Presence { kind, name } => {
                legacy::encode_presence(*kind, name)
            }
            WireMessage::Chat { body } => body.clone(),
            WireMessage::Rejected { reason } => {
                format!("{SERVER_NOTICE_PREFIX}{reason}")
            }
        })
    }

    fn decode(&self, frame: &str) -> WireMessage {
        match legacy::classify(frame) {
            MessageKind::Roster => WireMessage::Roster {
                names: legacy::decode_roster(frame).unwrap_or_default(),
            },
            MessageKind::Presence(kind) => WireMessage::Presence {
                kind,
                name: legacy::decode_presence(kind, frame)
                    .unwrap_or_default()
                    .to_owned(),
            },
            MessageKind::Chat | MessageKind::Rejected => {
                WireMessage::chat(frame)
            }
        }
    }

    fn classify(&self, frame: &str) -> MessageKind {
        legacy::classify(frame)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses tagged JSON objects (via `serde_json`).
///
/// ```rust
/// use chatrelay_protocol::{Codec, JsonCodec, WireMessage};
///
/// let codec = JsonCodec;
/// let frame = codec.encode(&WireMessage::chat("hello")).unwrap();
/// assert_eq!(frame, r#"{"type":"chat","body":"hello"}"#);
/// assert_eq!(codec.decode(&frame), WireMessage::chat("hello"));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, message: &WireMessage) -> Result<String, ProtocolError> {
        serde_json::to_string(message).map_err(ProtocolError::Encode)
    }

    fn decode(&self, frame: &str) -> WireMessage {
        serde_json::from_str(frame).unwrap_or_else(|_| WireMessage::chat(frame))
    }
}

/// Selects a codec at runtime, e.g. from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnyCodec {
    #[default]
    Legacy,
    #[cfg(feature = "json")]
    Json,
}

impl Codec for AnyCodec {
    fn encode(&self, message: &WireMessage) -> Result<String, ProtocolError> {
        match self {
            Self::Legacy => LegacyCodec.encode(message),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.encode(message),
        }
    }

    fn decode(&self, frame: &str) -> WireMessage {
        match self {
            Self::Legacy => LegacyCodec.decode(frame),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.decode(frame),
        }
    }

    fn classify(&self, frame: &str) -> MessageKind {
        match self {
            Self::Legacy => LegacyCodec.classify(frame),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.classify(frame),
        }
    }
}

/// Renders a presence event the way legacy clients display it.
pub fn presence_line(kind: PresenceKind, name: &str) -> String {
    format!("{SERVER_NOTICE_PREFIX}{name} has {kind} the chat.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<WireMessage> {
        vec![
            WireMessage::roster(vec!["Alice".into(), "Bob".into()]),
            WireMessage::roster(vec![]),
            WireMessage::joined("Bob"),
            WireMessage::left("Bob"),
            WireMessage::chat("Alice: hello"),
        ]
    }

    #[test]
    fn test_legacy_decode_inverts_encode() {
        let codec = LegacyCodec;
        for msg in all_variants() {
            let frame = codec.encode(&msg).unwrap();
            assert_eq!(codec.decode(&frame), msg, "frame {frame:?}");
        }
    }

    #[test]
    fn test_legacy_rejected_is_a_server_chat_line() {
        let codec = LegacyCodec;
        let frame = codec.encode(&WireMessage::rejected("relay is full")).unwrap();
        assert_eq!(frame, "[Server] relay is full");
        assert_eq!(codec.decode(&frame), WireMessage::chat(frame.clone()));
    }

    #[test]
    fn test_legacy_chat_with_embedded_sentinel_stays_chat() {
        let codec = LegacyCodec;
        let frame = format!("see {}»Bob", legacy::LEAVE_SENTINEL);
        assert_eq!(codec.decode(&frame), WireMessage::chat(frame.clone()));
        assert_eq!(codec.classify(&frame), MessageKind::Chat);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_decode_inverts_encode() {
        let codec = JsonCodec;
        let mut variants = all_variants();
        variants.push(WireMessage::rejected("name taken"));
        // With explicit tagging a chat body can hold anything.
        variants.push(WireMessage::chat(legacy::encode_roster(&["Mallory"])));
        for msg in variants {
            let frame = codec.encode(&msg).unwrap();
            assert_eq!(codec.decode(&frame), msg, "frame {frame:?}");
        }
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_presence_shape() {
        let frame = JsonCodec.encode(&WireMessage::left("Bob")).unwrap();
        assert_eq!(frame, r#"{"type":"presence","kind":"left","name":"Bob"}"#);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_garbage_is_chat() {
        let codec = JsonCodec;
        assert_eq!(codec.decode("not json"), WireMessage::chat("not json"));
        assert_eq!(
            codec.decode(r#"{"type":"unknown"}"#),
            WireMessage::chat(r#"{"type":"unknown"}"#)
        );
    }

    #[test]
    fn test_any_codec_dispatches() {
        let msg = WireMessage::joined("Bob");
        assert_eq!(
            AnyCodec::Legacy.encode(&msg).unwrap(),
            LegacyCodec.encode(&msg).unwrap()
        );
        #[cfg(feature = "json")]
        assert_eq!(
            AnyCodec::Json.encode(&msg).unwrap(),
            JsonCodec.encode(&msg).unwrap()
        );
    }

    #[test]
    fn test_presence_line_matches_legacy_text() {
        assert_eq!(
            presence_line(PresenceKind::Joined, "Bob"),
            "[Server] Bob has joined the chat."
        );
        assert_eq!(
            presence_line(PresenceKind::Left, "Bob"),
            "[Server] Bob has left the chat."
        );
    }
}

//! Message types that travel between peers and the relay.
//!
//! On the legacy wire these are not separately typed: they are told apart
//! by sentinel prefixes inside one string (see [`crate::legacy`]). The JSON
//! codec carries the same enum as an explicitly tagged object.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a presence event announces an arrival or a departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Joined,
    Left,
}

impl fmt::Display for PresenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined => write!(f, "joined"),
            Self::Left => write!(f, "left"),
        }
    }
}

/// The result of sniffing a frame without fully decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A full roster snapshot.
    Roster,
    /// A presence event (join or leave).
    Presence(PresenceKind),
    /// Ordinary chat text. Anything unrecognised lands here.
    Chat,
    /// A server notice that the connection is being refused.
    Rejected,
}

/// One message on the wire.
///
/// ```text
/// server → client : Roster, Presence(Joined|Left), Chat, Rejected
/// client → server : Chat, Presence(Left)   (the disconnect request)
/// ```
///
/// The handshake frame (the raw display name) is not a `WireMessage`: it is
/// read verbatim before any decoding happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Every currently registered name, in registration order.
    Roster { names: Vec<String> },

    /// A named user joined or left.
    ///
    /// Sent by a client with `kind: Left` this is the explicit disconnect
    /// request.
    Presence { kind: PresenceKind, name: String },

    /// Chat text. The relay prefixes the sender (`"Alice: hello"`) before
    /// fan-out.
    Chat { body: String },

    /// The relay is refusing this connection and will close it.
    Rejected { reason: String },
}

impl WireMessage {
    pub fn roster(names: Vec<String>) -> Self {
        Self::Roster { names }
    }

    pub fn joined(name: impl Into<String>) -> Self {
        Self::Presence {
            kind: PresenceKind::Joined,
            name: name.into(),
        }
    }

    pub fn left(name: impl Into<String>) -> Self {
        Self::Presence {
            kind: PresenceKind::Left,
            name: name.into(),
        }
    }

    pub fn chat(body: impl Into<String>) -> Self {
        Self::Chat { body: body.into() }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns the coarse kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Roster { .. } => MessageKind::Roster,
            Self::Presence { kind, .. } => MessageKind::Presence(*kind),
            Self::Chat { .. } => MessageKind::Chat,
            Self::Rejected { .. } => MessageKind::Rejected,
        }
    }
}

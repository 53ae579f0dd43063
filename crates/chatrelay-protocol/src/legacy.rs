//! The sentinel-prefixed string format spoken by legacy chat peers.
//!
//! Control payloads are ordinary strings that begin with a reserved token:
//!
//! | Sentinel              | Shape                                  |
//! |-----------------------|----------------------------------------|
//! | [`ROSTER_SENTINEL`]   | `SENTINEL` + (`»` + name)*             |
//! | [`JOIN_SENTINEL`]     | `SENTINEL` + `»` + name                |
//! | [`LEAVE_SENTINEL`]    | `SENTINEL` + `»` + name                |
//!
//! Anything else is chat text. Classification only looks at the *start* of
//! a payload, so chat that merely mentions a sentinel stays chat. Chat that
//! begins with one is still misclassified; there is no escaping in this
//! format. Use the JSON codec where that matters.

use crate::{MessageKind, PresenceKind};

/// Prefix of a full roster snapshot.
pub const ROSTER_SENTINEL: &str = "$$_UPDATE_USERLIST_$$";

/// Prefix of a "user joined" event.
pub const JOIN_SENTINEL: &str = "$$_U_ADD_USER_$$";

/// Prefix of a "user left" event, and of the client's disconnect request.
pub const LEAVE_SENTINEL: &str = "$$_U_RMV_USER_$$";

/// Separates the sentinel from names.
pub const DELIMITER: char = '»';

/// Prefix shared by every sentinel. Display names may not start with it.
pub const RESERVED_PREFIX: &str = "$$_";

/// Encodes a roster snapshot.
pub fn encode_roster<S: AsRef<str>>(names: &[S]) -> String {
    let mut out = String::from(ROSTER_SENTINEL);
    for name in names {
        out.push(DELIMITER);
        out.push_str(name.as_ref());
    }
    out
}

/// Decodes a roster payload into names, in order.
///
/// The sentinel itself is never returned, so a payload without any
/// delimiter decodes to an empty roster. Empty elements are dropped too;
/// no valid display name is empty. Returns `None` if the payload is
/// not a roster.
pub fn decode_roster(payload: &str) -> Option<Vec<String>> {
    let rest = roster_body(payload)?;
    Some(
        rest.split(DELIMITER)
            .skip(1)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

/// Encodes a presence event.
pub fn encode_presence(kind: PresenceKind, name: &str) -> String {
    let sentinel = match kind {
        PresenceKind::Joined => JOIN_SENTINEL,
        PresenceKind::Left => LEAVE_SENTINEL,
    };
    format!("{sentinel}{DELIMITER}{name}")
}

/// Extracts the name from a presence payload of the given kind.
pub fn decode_presence(kind: PresenceKind, payload: &str) -> Option<&str> {
    let sentinel = match kind {
        PresenceKind::Joined => JOIN_SENTINEL,
        PresenceKind::Left => LEAVE_SENTINEL,
    };
    payload.strip_prefix(sentinel)?.strip_prefix(DELIMITER)
}

/// Classifies a payload by its prefix.
///
/// Roster is checked first, then join, then leave; no match means chat.
pub fn classify(payload: &str) -> MessageKind {
    if roster_body(payload).is_some() {
        MessageKind::Roster
    } else if decode_presence(PresenceKind::Joined, payload).is_some() {
        MessageKind::Presence(PresenceKind::Joined)
    } else if decode_presence(PresenceKind::Left, payload).is_some() {
        MessageKind::Presence(PresenceKind::Left)
    } else {
        MessageKind::Chat
    }
}

/// The part of a roster payload after the sentinel: empty or starting with
/// the delimiter.
fn roster_body(payload: &str) -> Option<&str> {
    let rest = payload.strip_prefix(ROSTER_SENTINEL)?;
    (rest.is_empty() || rest.starts_with(DELIMITER)).then_some(rest)
}

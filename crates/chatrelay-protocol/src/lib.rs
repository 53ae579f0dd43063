//! Wire protocol for chatrelay.
//!
//! This crate defines what peers and the relay say to each other:
//!
//! - **Types** ([`WireMessage`], [`PresenceKind`], [`MessageKind`]): the
//!   three message kinds (roster snapshot, presence event, chat text) plus
//!   the relay's rejection notice.
//! - **Codecs** ([`Codec`] trait, [`LegacyCodec`], [`JsonCodec`]): how a
//!   message becomes the single string carried by one transport frame.
//! - **Legacy format** ([`legacy`]): the sentinel tokens, the delimiter and
//!   the pure encode/decode/classify functions behind [`LegacyCodec`].
//! - **Name policy** ([`NamePolicy`]): what counts as a display name.
//!
//! The protocol layer knows nothing about connections or sessions; it only
//! turns messages into strings and back.
//!
//! ```text
//! Transport (frames) → Protocol (WireMessage) → Session (registry, fan-out)
//! ```

mod codec;
mod error;
pub mod legacy;
mod name;
mod types;

#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::{presence_line, AnyCodec, Codec, LegacyCodec, SERVER_NOTICE_PREFIX};
pub use error::ProtocolError;
pub use name::NamePolicy;
pub use types::{MessageKind, PresenceKind, WireMessage};

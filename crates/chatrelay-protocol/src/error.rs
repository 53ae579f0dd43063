//! Error types for the protocol layer.
//!
//! Decoding never fails: a frame that matches no known shape is chat text.
//! What can fail is encoding (JSON only) and display-name validation.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a [`WireMessage`](crate::WireMessage)
    /// into a frame).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A display name was rejected by the [`NamePolicy`](crate::NamePolicy).
    #[error("invalid display name: {0}")]
    InvalidName(String),
}

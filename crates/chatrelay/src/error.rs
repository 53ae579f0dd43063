//! Unified error type for the relay.

use chatrelay_protocol::ProtocolError;
use chatrelay_session::SessionError;
use chatrelay_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, invalid display name).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (handshake failure, admission rejected).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The global tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

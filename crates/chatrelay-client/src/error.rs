//! Error types for the client.

use chatrelay_protocol::ProtocolError;
use chatrelay_transport::TransportError;

/// Errors returned by [`ChatClient`](crate::ChatClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The display name failed the name policy, or a frame could not be
    /// encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connecting, sending, or closing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The relay refused the connection.
    #[error("relay refused the connection: {0}")]
    Rejected(String),

    /// The relay accepted the connection but never answered the handshake.
    #[error("relay did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

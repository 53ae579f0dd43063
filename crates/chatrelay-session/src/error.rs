//! Error types for the session layer.

use crate::SessionPhase;

/// Why the [`Registry`](crate::Registry) refused to insert a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another live session already uses this display name.
    #[error("display name {0:?} is already in use")]
    DuplicateName(String),

    /// The registry is at its configured hard limit.
    #[error("relay is full ({0} sessions)")]
    Full(usize),
}

/// Errors that can occur while driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport closed, errored, or timed out before a display name
    /// was read. The session was never registered.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The session completed the handshake but could not be admitted.
    #[error(transparent)]
    Rejected(#[from] RegistryError),

    /// The operation is not valid in the session's current phase.
    #[error("operation not valid in phase {0}")]
    InvalidPhase(SessionPhase),
}

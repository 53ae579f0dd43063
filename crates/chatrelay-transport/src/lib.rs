//! Transport abstraction layer for chatrelay.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! how framed strings travel between a peer and the relay. Every frame is a
//! single UTF-8 string; the framing itself is the transport's job.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! The in-memory transport ([`MemoryTransport`]) is always available and is
//! what the test suites use when they don't need a real socket.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientStream, WebSocketConnection, WebSocketTransport,
    DEFAULT_UPGRADE_TIMEOUT,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique `ConnectionId`.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Stops accepting. Peers that try to connect afterwards are refused,
    /// and later calls to [`accept`](Self::accept) return an error.
    fn shutdown(
        &mut self,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A single connection that carries string frames in both directions.
///
/// All methods take `&self` so that a reader and a writer can share one
/// connection; implementations serialize access internally.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one frame to the remote peer.
    fn send(
        &self,
        frame: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the connection. Closing an already closed connection
    /// succeeds.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

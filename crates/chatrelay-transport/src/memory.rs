//! In-process transport backed by tokio channels.
//!
//! [`MemoryConnection::pair`] returns two connected ends; whatever one end
//! sends, the other receives, in order. Closing (or dropping) one end makes
//! the other end's `recv` return `Ok(None)` and its `send` fail.

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// One end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    /// `None` once this end has been closed.
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryConnection {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(b_tx)),
            rx: Mutex::new(a_rx),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(a_tx)),
            rx: Mutex::new(b_rx),
        };
        (a, b)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, frame: &str) -> Result<(), Self::Error> {
        let tx = self.tx.lock().await;
        let tx = tx.as_ref().ok_or_else(|| {
            TransportError::ConnectionClosed("local end closed".into())
        })?;
        tx.send(frame.to_owned()).map_err(|_| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer dropped",
            ))
        })
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// A [`Transport`] whose connections are created in-process through a
/// [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Dials a [`MemoryTransport`]. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryTransport {
    /// Creates a transport and the connector that dials it.
    pub fn channel() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { incoming: rx }, MemoryConnector { outgoing: tx })
    }
}

impl MemoryConnector {
    /// Opens a new connection to the transport and returns the client end.
    pub fn connect(&self) -> Result<MemoryConnection, TransportError> {
        let (client, server) = MemoryConnection::pair();
        self.outgoing.send(server).map_err(|_| TransportError::Shutdown)?;
        Ok(client)
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&mut self) -> Result<(), Self::Error> {
        // Connections already queued are dropped; connectors fail from now.
        self.incoming.close();
        while self.incoming.try_recv().is_ok() {}
        Ok(())
    }
}

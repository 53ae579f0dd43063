//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Every chat frame travels as one WebSocket text message. Binary messages
//! are accepted on receive as long as they hold valid UTF-8.
//!
//! The listener hands each TCP stream to its own upgrade task, bounded by
//! an upgrade timeout; [`Transport::accept`] yields connections as their
//! upgrades complete.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// The stream type produced by [`WebSocketConnection::connect`].
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// How long an accepted TCP stream may take to complete the WebSocket
/// upgrade, unless overridden with
/// [`WebSocketTransport::with_upgrade_timeout`].
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// The HTTP upgrade of each accepted stream runs on its own task, so a peer
/// that opens a socket and never speaks holds up nobody but itself.
/// Upgrades in flight survive a cancelled [`accept`](Transport::accept).
pub struct WebSocketTransport {
    /// `None` once the transport has been shut down.
    listener: Option<TcpListener>,
    upgrades: JoinSet<Option<WebSocketConnection>>,
    upgrade_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener: Some(listener),
            upgrades: JoinSet::new(),
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
        })
    }

    /// Sets how long a new stream may take to complete the upgrade before
    /// it is dropped.
    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport has been shut down",
            )),
        }
    }
}

/// What woke up [`WebSocketTransport::accept`].
enum Accepted {
    Stream(std::io::Result<(TcpStream, SocketAddr)>),
    Upgrade(Result<Option<WebSocketConnection>, JoinError>),
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return Err(TransportError::Shutdown);
            };

            let accepted = tokio::select! {
                biased;

                Some(joined) = self.upgrades.join_next(),
                    if !self.upgrades.is_empty() => Accepted::Upgrade(joined),

                stream = listener.accept() => Accepted::Stream(stream),
            };

            match accepted {
                Accepted::Stream(stream) => {
                    let (stream, addr) =
                        stream.map_err(TransportError::AcceptFailed)?;
                    self.upgrades
                        .spawn(upgrade(stream, addr, self.upgrade_timeout));
                }
                Accepted::Upgrade(Ok(Some(conn))) => return Ok(conn),
                Accepted::Upgrade(Ok(None)) => {}
                Accepted::Upgrade(Err(e)) => {
                    tracing::debug!(error = %e, "upgrade task ended abnormally");
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), Self::Error> {
        if self.listener.take().is_some() {
            tracing::info!(
                pending_upgrades = self.upgrades.len(),
                "WebSocket transport closed"
            );
        }
        self.upgrades.abort_all();
        Ok(())
    }
}

/// Completes the server side of the WebSocket handshake on one stream.
async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    limit: Duration,
) -> Option<WebSocketConnection> {
    match tokio::time::timeout(limit, tokio_tungstenite::accept_async(stream))
        .await
    {
        Ok(Ok(ws)) => {
            let conn = WebSocketConnection::from_stream(ws);
            tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
            Some(conn)
        }
        Ok(Err(e)) => {
            tracing::debug!(%addr, error = %e, "WebSocket upgrade failed");
            None
        }
        Err(_) => {
            tracing::debug!(%addr, "WebSocket upgrade timed out");
            None
        }
    }
}

/// A single WebSocket connection.
///
/// The socket is split so that a pending `recv` never blocks a `send`.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already upgraded WebSocket stream.
    pub fn from_stream(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl WebSocketConnection<ClientStream> {
    /// Dials a relay at `url` (e.g. `ws://127.0.0.1:5555`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        let conn = Self::from_stream(ws);
        tracing::debug!(id = %conn.id, url, "connected to relay");
        Ok(conn)
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, frame: &str) -> Result<(), Self::Error> {
        let msg = Message::Text(frame.to_owned().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map(Some).map_err(
                        |e| {
                            TransportError::ReceiveFailed(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                e,
                            ))
                        },
                    );
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.sink.lock().await.close().await {
            Ok(())
            | Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

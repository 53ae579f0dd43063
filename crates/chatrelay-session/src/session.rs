//! A session: the relay's state for one connected peer.
//!
//! The session owns its transport exclusively and is driven by exactly one
//! task. Everyone else reaches it only through the [`SessionHandle`] it
//! places in the [`Registry`] while active.
//!
//! ```text
//!   Handshake ──(name read, registered)──→ Active ──→ Closing ──→ Closed
//!       │                                                ↑
//!       └──────(error, timeout, rejected)─────────────────────→ Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::Codec;
use chatrelay_transport::Connection;
use tokio::sync::{mpsc, watch};

use crate::{Broadcaster, Registry, SessionError, SessionHandle};

/// Counter for generating process-unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a session, stable for its lifetime.
///
/// Used as the removal key so that teardown never removes a later session
/// that happens to reuse the same display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates the next id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Lifecycle phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport open, waiting for the identity frame.
    Handshake,
    /// Registered and exchanging messages.
    Active,
    /// Tearing down. Already removed from the registry.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "Handshake"),
            Self::Active => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why an active session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the transport.
    PeerClosed,
    /// Reading from or writing to the transport failed.
    TransportFailure(String),
    /// The peer sent the explicit disconnect request.
    DisconnectRequested,
    /// The broadcast engine evicted the session and dropped its queue.
    Evicted,
    /// The relay is shutting down. No broadcasts are sent.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::TransportFailure(e) => write!(f, "transport failure: {e}"),
            Self::DisconnectRequested => write!(f, "disconnect requested"),
            Self::Evicted => write!(f, "evicted"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// What [`Session::next_frame`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One frame from the peer, undecoded.
    Frame(String),
    /// The session must close.
    Closed(CloseReason),
}

/// Server-side state for one connected peer.
pub struct Session<C: Connection> {
    id: SessionId,
    name: Option<String>,
    conn: C,
    phase: SessionPhase,
    /// Frames queued by the broadcast engine. `Some` while active.
    outbound: Option<mpsc::Receiver<Arc<str>>>,
}

impl<C: Connection> Session<C> {
    /// Wraps a freshly accepted transport. The session starts in
    /// [`SessionPhase::Handshake`].
    pub fn new(conn: C) -> Self {
        Self {
            id: SessionId::next(),
            name: None,
            conn,
            phase: SessionPhase::Handshake,
            outbound: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The display name, once the handshake has been read.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Reads exactly one frame: the peer's raw display name.
    ///
    /// On failure the transport is closed and the session is `Closed`; it
    /// was never registered and nobody else hears about it.
    ///
    /// # Errors
    /// [`SessionError::HandshakeFailed`] on close, error or timeout, and
    /// [`SessionError::InvalidPhase`] if the handshake already happened.
    pub async fn read_identity(
        &mut self,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        if self.phase != SessionPhase::Handshake {
            return Err(SessionError::InvalidPhase(self.phase));
        }

        let reason = match tokio::time::timeout(timeout, self.conn.recv()).await
        {
            Ok(Ok(Some(name))) => return Ok(name),
            Ok(Ok(None)) => "connection closed before handshake".to_owned(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "handshake timed out".to_owned(),
        };

        self.close().await;
        Err(SessionError::HandshakeFailed(reason))
    }

    /// Registers the session under `name` and makes it active.
    ///
    /// `queue_capacity` bounds how many frames may wait for this peer
    /// before the broadcast engine gives up on it.
    ///
    /// # Errors
    /// [`SessionError::Rejected`] if the registry refuses the name or is
    /// full. The session stays in `Handshake` so the caller can tell the
    /// peer why before closing.
    pub fn register(
        &mut self,
        name: String,
        registry: &Registry,
        queue_capacity: usize,
    ) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Handshake {
            return Err(SessionError::InvalidPhase(self.phase));
        }

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        registry.insert(SessionHandle::new(self.id, name.as_str(), tx))?;

        self.name = Some(name);
        self.outbound = Some(rx);
        self.phase = SessionPhase::Active;
        Ok(())
    }

    /// Sends one frame directly on the transport, bypassing the queue.
    /// Used to tell a peer why it is being turned away.
    pub async fn send_direct(&self, frame: &str) -> Result<(), C::Error> {
        self.conn.send(frame).await
    }

    /// Waits for the next frame from the peer while flushing queued
    /// outbound frames to it.
    ///
    /// Outbound frames are written in queue order, so what this peer sees
    /// matches the order of broadcast calls.
    pub async fn next_frame(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Incoming {
        let Some(outbound) = self.outbound.as_mut() else {
            return Incoming::Closed(CloseReason::Evicted);
        };

        loop {
            if *shutdown.borrow_and_update() {
                return Incoming::Closed(CloseReason::Shutdown);
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // A dropped sender means the relay itself is gone.
                    if changed.is_err() {
                        return Incoming::Closed(CloseReason::Shutdown);
                    }
                }

                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.conn.send(&frame).await {
                            return Incoming::Closed(
                                CloseReason::TransportFailure(e.to_string()),
                            );
                        }
                    }
                    None => return Incoming::Closed(CloseReason::Evicted),
                },

                received = self.conn.recv() => {
                    return match received {
                        Ok(Some(frame)) => Incoming::Frame(frame),
                        Ok(None) => Incoming::Closed(CloseReason::PeerClosed),
                        Err(e) => Incoming::Closed(
                            CloseReason::TransportFailure(e.to_string()),
                        ),
                    };
                }
            }
        }
    }

    /// Tears the session down. Idempotent.
    ///
    /// Removes the session from the registry if it is still there. If this
    /// call is the one that removed it, and the relay isn't shutting down,
    /// the remaining sessions get a roster update and a LEFT event. The
    /// transport is closed on every path.
    ///
    /// Returns `true` if this call announced the departure.
    pub async fn teardown<K: Codec>(
        &mut self,
        reason: &CloseReason,
        broadcaster: &Broadcaster<K>,
    ) -> bool {
        if matches!(self.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return false;
        }
        let was_active = self.phase == SessionPhase::Active;
        self.phase = SessionPhase::Closing;

        let mut announced = false;
        if was_active {
            if let Some(handle) = broadcaster.registry().remove_by_id(self.id) {
                tracing::info!(
                    session_id = %self.id,
                    name = %handle.name(),
                    %reason,
                    "session closed"
                );
                if *reason != CloseReason::Shutdown {
                    broadcaster.announce_departure(handle.name());
                    announced = true;
                }
            }
        }
        self.outbound = None;

        self.close().await;
        announced
    }

    /// Closes the transport and marks the session `Closed`. Errors from an
    /// already broken transport are ignored.
    pub async fn close(&mut self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(session_id = %self.id, error = %e, "close failed");
        }
        self.outbound = None;
        self.phase = SessionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the session state machine, driven over the in-memory
    //! transport.

    use chatrelay_protocol::{Codec, LegacyCodec, WireMessage};
    use chatrelay_transport::MemoryConnection;

    use super::*;
    use crate::RegistryError;

    fn broadcaster() -> Broadcaster<LegacyCodec> {
        Broadcaster::new(Arc::new(Registry::new()), Arc::new(LegacyCodec))
    }

    fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// Registers a session named `name` and returns it with the peer end.
    fn active(
        name: &str,
        registry: &Registry,
    ) -> (Session<MemoryConnection>, MemoryConnection) {
        let (server, peer) = MemoryConnection::pair();
        let mut session = Session::new(server);
        session.register(name.to_owned(), registry, 16).unwrap();
        (session, peer)
    }

    // =====================================================================
    // read_identity()
    // =====================================================================

    #[tokio::test]
    async fn test_read_identity_returns_raw_name() {
        let (server, peer) = MemoryConnection::pair();
        let mut session = Session::new(server);
        peer.send("Alice").await.unwrap();

        let name = session.read_identity(Duration::from_secs(1)).await.unwrap();

        assert_eq!(name, "Alice");
        assert_eq!(session.phase(), SessionPhase::Handshake);
    }

    #[tokio::test]
    async fn test_read_identity_peer_closed_is_handshake_failure() {
        let (server, peer) = MemoryConnection::pair();
        let mut session = Session::new(server);
        drop(peer);

        let result = session.read_identity(Duration::from_secs(1)).await;

        assert!(matches!(result, Err(SessionError::HandshakeFailed(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn test_read_identity_times_out() {
        let (server, _peer) = MemoryConnection::pair();
        let mut session = Session::new(server);

        let result = session.read_identity(Duration::from_millis(20)).await;

        assert!(
            matches!(&result, Err(SessionError::HandshakeFailed(r)) if r.contains("timed out")),
            "got {result:?}"
        );
        assert_eq!(session.phase(), SessionPhase::Closed);
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[tokio::test]
    async fn test_register_makes_session_active_and_visible() {
        let registry = Registry::new();
        let (session, _peer) = active("Alice", &registry);

        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.name(), Some("Alice"));
        assert_eq!(registry.snapshot(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_register_duplicate_stays_in_handshake() {
        let registry = Registry::new();
        let (_alice, _peer) = active("Alice", &registry);

        let (server, _peer2) = MemoryConnection::pair();
        let mut imposter = Session::new(server);
        let result = imposter.register("Alice".into(), &registry, 16);

        assert!(matches!(
            result,
            Err(SessionError::Rejected(RegistryError::DuplicateName(_)))
        ));
        assert_eq!(imposter.phase(), SessionPhase::Handshake);
        assert_eq!(registry.len(), 1);
    }

    // =====================================================================
    // next_frame()
    // =====================================================================

    #[tokio::test]
    async fn test_next_frame_flushes_queue_and_reads_peer() {
        let b = broadcaster();
        let (mut session, peer) = active("Alice", b.registry());
        let (_tx, mut shutdown) = no_shutdown();

        b.broadcast(&WireMessage::chat("first"));
        b.broadcast(&WireMessage::chat("second"));
        peer.send("hi").await.unwrap();

        let incoming = session.next_frame(&mut shutdown).await;

        assert_eq!(incoming, Incoming::Frame("hi".into()));
        assert_eq!(peer.recv().await.unwrap().as_deref(), Some("first"));
        assert_eq!(peer.recv().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_next_frame_peer_close() {
        let registry = Registry::new();
        let (mut session, peer) = active("Alice", &registry);
        let (_tx, mut shutdown) = no_shutdown();

        peer.close().await.unwrap();

        assert_eq!(
            session.next_frame(&mut shutdown).await,
            Incoming::Closed(CloseReason::PeerClosed)
        );
    }

    #[tokio::test]
    async fn test_next_frame_reports_eviction() {
        let registry = Registry::new();
        let (mut session, _peer) = active("Alice", &registry);
        let (_tx, mut shutdown) = no_shutdown();

        // Dropping the only handle closes the queue.
        registry.clear();

        assert_eq!(
            session.next_frame(&mut shutdown).await,
            Incoming::Closed(CloseReason::Evicted)
        );
    }

    #[tokio::test]
    async fn test_next_frame_observes_shutdown() {
        let registry = Registry::new();
        let (mut session, _peer) = active("Alice", &registry);
        let (tx, mut shutdown) = no_shutdown();

        let driver = tokio::spawn(async move {
            session.next_frame(&mut shutdown).await
        });
        tx.send(true).unwrap();

        assert_eq!(
            driver.await.unwrap(),
            Incoming::Closed(CloseReason::Shutdown)
        );
    }

    // =====================================================================
    // teardown()
    // =====================================================================

    #[tokio::test]
    async fn test_teardown_announces_once_and_closes_transport() {
        let b = broadcaster();
        let (mut alice, alice_peer) = active("Alice", b.registry());
        let (mut bob, bob_peer) = active("Bob", b.registry());
        let (_tx, mut shutdown) = no_shutdown();

        let first = bob.teardown(&CloseReason::DisconnectRequested, &b).await;
        let second = bob.teardown(&CloseReason::DisconnectRequested, &b).await;

        assert!(first);
        assert!(!second, "second teardown must be a no-op");
        assert_eq!(bob.phase(), SessionPhase::Closed);
        assert_eq!(b.registry().snapshot(), vec!["Alice"]);
        assert!(bob_peer.recv().await.unwrap().is_none(), "transport closed");

        // Alice's driver flushes exactly one roster + LEFT pair.
        alice_peer.send("bye").await.unwrap();
        assert_eq!(
            alice.next_frame(&mut shutdown).await,
            Incoming::Frame("bye".into())
        );
        let codec = LegacyCodec;
        assert_eq!(
            codec.decode(&alice_peer.recv().await.unwrap().unwrap()),
            WireMessage::roster(vec!["Alice".into()])
        );
        assert_eq!(
            codec.decode(&alice_peer.recv().await.unwrap().unwrap()),
            WireMessage::left("Bob")
        );
        alice.teardown(&CloseReason::Shutdown, &b).await;
        assert!(alice_peer.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_teardown_after_eviction_does_not_announce() {
        let b = broadcaster();
        let (mut bob, _peer) = active("Bob", b.registry());

        // The engine already removed (and announced) Bob.
        b.registry().remove("Bob").unwrap();

        assert!(!bob.teardown(&CloseReason::Evicted, &b).await);
        assert_eq!(bob.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn test_teardown_on_shutdown_is_silent() {
        let b = broadcaster();
        let (_alice, _alice_peer) = active("Alice", b.registry());
        let (mut bob, _bob_peer) = active("Bob", b.registry());

        assert!(!bob.teardown(&CloseReason::Shutdown, &b).await);
        assert_eq!(b.registry().snapshot(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_teardown_of_unregistered_session_just_closes() {
        let b = broadcaster();
        let (server, peer) = MemoryConnection::pair();
        let mut session = Session::new(server);

        assert!(!session.teardown(&CloseReason::PeerClosed, &b).await);
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(peer.recv().await.unwrap().is_none());
    }
}

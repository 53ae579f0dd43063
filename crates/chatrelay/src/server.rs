//! `RelayServer` builder and accept loop.
//!
//! This is the entry point for running a relay. It ties the layers
//! together: transport → protocol → session, one driver task per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{AnyCodec, Codec, NamePolicy};
use chatrelay_session::{Broadcaster, Registry};
use chatrelay_transport::{
    Connection, Transport, TransportError, WebSocketTransport,
};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::config::{RelayConfig, WireFormat};
use crate::handler::handle_connection;
use crate::RelayError;

/// Shared server state passed to each connection driver.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The only
/// mutable part is the registry inside the broadcaster.
pub(crate) struct ServerState<K: Codec> {
    pub(crate) config: RelayConfig,
    pub(crate) broadcaster: Broadcaster<K>,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,ignore
/// use chatrelay::prelude::*;
///
/// let server = RelayServer::builder()
///     .bind("0.0.0.0:5555")
///     .max_sessions(100)
///     .build()
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Clone, Default)]
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting at once, e.g. with a loaded config file.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    pub fn hard_limit(mut self, enabled: bool) -> Self {
        self.config.hard_limit = enabled;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms =
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.config.outbound_queue = capacity;
        self
    }

    pub fn name_policy(mut self, policy: NamePolicy) -> Self {
        self.config.name_policy = policy;
        self
    }

    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.config.wire_format = format;
        self
    }

    /// Binds a WebSocket listener and builds the server.
    ///
    /// The codec follows the configured [`WireFormat`].
    ///
    /// # Errors
    /// [`RelayError::Config`] for an unusable configuration, or a
    /// transport error if the address can't be bound.
    pub async fn build(
        self,
    ) -> Result<RelayServer<WebSocketTransport, AnyCodec>, RelayError> {
        self.config.validate()?;
        let transport = WebSocketTransport::bind(&self.config.bind_addr)
            .await?
            .with_upgrade_timeout(self.config.handshake_timeout());
        let codec = AnyCodec::from(self.config.wire_format);
        self.build_with(transport, codec)
    }

    /// Builds the server over an already bound transport and an explicit
    /// codec. `bind_addr` and `wire_format` are ignored.
    ///
    /// # Errors
    /// [`RelayError::Config`] for an unusable configuration.
    pub fn build_with<T, K>(
        self,
        transport: T,
        codec: K,
    ) -> Result<RelayServer<T, K>, RelayError>
    where
        T: Transport<Error = TransportError>,
        T::Connection: Connection<Error = TransportError>,
        K: Codec,
    {
        self.config.validate()?;

        let registry = if self.config.hard_limit {
            Registry::with_limit(self.config.max_sessions)
        } else {
            Registry::new()
        };
        let broadcaster = Broadcaster::new(Arc::new(registry), Arc::new(codec));
        let (shutdown, _) = watch::channel(false);

        Ok(RelayServer {
            transport,
            state: Arc::new(ServerState {
                config: self.config,
                broadcaster,
            }),
            shutdown: Arc::new(shutdown),
        })
    }
}

/// Stops a running [`RelayServer`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Asks the server to stop. The accept loop exits, every session is
    /// closed without LEFT broadcasts, and [`RelayServer::run`] returns
    /// once all drivers have finished.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A relay ready to accept connections.
///
/// Call [`run()`](Self::run) to start accepting.
pub struct RelayServer<T: Transport, K: Codec> {
    transport: T,
    state: Arc<ServerState<K>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RelayServer<WebSocketTransport, AnyCodec> {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }
}

impl<K: Codec> RelayServer<WebSocketTransport, K> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T, K> RelayServer<T, K>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
    K: Codec,
{
    pub fn config(&self) -> &RelayConfig {
        &self.state.config
    }

    /// The live registry. Useful for embedding and tests.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.state.broadcaster.registry())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the accept loop until shutdown is requested or the transport
    /// stops producing connections.
    ///
    /// Each accepted connection gets its own driver task. A connection
    /// arriving while the registry already holds `max_sessions` sessions
    /// is closed without a handshake. On exit the transport stops
    /// listening, then every driver is told to close its transport silently
    /// and is awaited.
    ///
    /// # Errors
    /// Per-connection failures never surface here; they are logged.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::info!(
            max_sessions = self.state.config.max_sessions,
            "relay running"
        );

        let mut stop = self.shutdown.subscribe();
        let mut drivers: JoinSet<Result<(), RelayError>> = JoinSet::new();

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                // The sender lives in `self`, so this can't fail.
                _ = stop.changed() => {}

                Some(joined) = drivers.join_next(), if !drivers.is_empty() => {
                    log_driver_exit(joined);
                }

                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => self.spawn_driver(conn, &mut drivers),
                    Err(TransportError::Shutdown) => {
                        tracing::info!("transport stopped accepting");
                        break;
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }

        self.shutdown.send_replace(true);
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
        let registered = self.state.broadcaster.registry().len();
        self.state.broadcaster.registry().clear();

        tracing::info!(registered, drivers = drivers.len(), "relay shutting down");
        while let Some(joined) = drivers.join_next().await {
            log_driver_exit(joined);
        }
        tracing::info!("relay stopped");
        Ok(())
    }

    fn spawn_driver(
        &self,
        conn: T::Connection,
        drivers: &mut JoinSet<Result<(), RelayError>>,
    ) {
        let registered = self.state.broadcaster.registry().len();
        if registered >= self.state.config.max_sessions {
            tracing::info!(
                conn_id = %conn.id(),
                registered,
                "relay full, refusing connection"
            );
            drivers.spawn(async move {
                conn.close().await?;
                Ok(())
            });
            return;
        }

        let state = Arc::clone(&self.state);
        let stop = self.shutdown.subscribe();
        drivers.spawn(handle_connection(conn, state, stop));
    }
}

fn log_driver_exit(joined: Result<Result<(), RelayError>, JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "connection ended with error");
        }
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "connection driver panicked");
        }
        Err(e) => tracing::debug!(error = %e, "connection driver cancelled"),
    }
}

//! # chatrelay
//!
//! A text-chat relay. Peers connect, announce a display name, and every
//! chat line any of them sends is fanned out to all of them, together with
//! roster snapshots and join/leave events.
//!
//! The crate wires the layers together:
//!
//! ```text
//! RelayServer (this crate)   ← accept loop, per-connection drivers, config
//!     ↕
//! chatrelay-session          ← registry, session lifecycle, broadcast
//!     ↕
//! chatrelay-protocol         ← legacy sentinel / JSON codecs, name policy
//! chatrelay-transport        ← WebSocket and in-memory connections
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatrelay::prelude::*;
//!
//! # async fn run() -> Result<(), RelayError> {
//! let server = RelayServer::builder()
//!     .bind("0.0.0.0:5555")
//!     .max_sessions(30)
//!     .build()
//!     .await?;
//!
//! let shutdown = server.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;
mod telemetry;

pub use config::{RelayConfig, WireFormat};
pub use error::RelayError;
pub use server::{RelayServer, RelayServerBuilder, ShutdownHandle};
pub use telemetry::init_tracing;

pub use chatrelay_protocol as protocol;
pub use chatrelay_session as session;
pub use chatrelay_transport as transport;

/// Everything needed to configure and run a relay.
pub mod prelude {
    pub use crate::{
        RelayConfig, RelayError, RelayServer, RelayServerBuilder,
        ShutdownHandle, WireFormat,
    };
    pub use chatrelay_protocol::{AnyCodec, Codec, NamePolicy, WireMessage};
}

//! Session management for chatrelay.
//!
//! This crate holds the concurrency core of the relay:
//!
//! 1. **Sessions**: per-connection state and its lifecycle state machine
//!    ([`Session`], [`SessionPhase`])
//! 2. **Registry**: who is connected, in registration order ([`Registry`])
//! 3. **Broadcast**: fan-out to every registered session with lazy
//!    eviction of dead ones ([`Broadcaster`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)  ← accepts connections, drives one Session per task
//!     ↕
//! Session Layer (this crate)  ← registry, lifecycle, fan-out
//!     ↕
//! Protocol + Transport (below)  ← WireMessage codecs, framed connections
//! ```

mod broadcast;
mod error;
mod registry;
mod session;

pub use broadcast::Broadcaster;
pub use error::{RegistryError, SessionError};
pub use registry::{Delivery, Registry, SessionHandle};
pub use session::{CloseReason, Incoming, Session, SessionId, SessionPhase};

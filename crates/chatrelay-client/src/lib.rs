//! Client library for chatrelay.
//!
//! A [`ChatClient`] holds one connection to a relay. Everything the relay
//! sends back is delivered through a [`ChatEvents`] implementation, which
//! is where a user interface plugs in:
//!
//! ```rust,no_run
//! use chatrelay_client::{ChatClient, ClientEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), chatrelay_client::ClientError> {
//! let (events, mut rx) = mpsc::unbounded_channel::<ClientEvent>();
//! let client = ChatClient::connect("ws://127.0.0.1:5555", "Alice", events).await?;
//!
//! client.send_chat("hello").await?;
//! while let Some(event) = rx.recv().await {
//!     if let ClientEvent::Text(line) = event {
//!         println!("{line}");
//!         break;
//!     }
//! }
//! client.disconnect().await
//! # }
//! ```

mod client;
mod error;
mod events;

pub use client::{ChatClient, ADMISSION_TIMEOUT};
pub use error::ClientError;
pub use events::{ChatEvents, ClientEvent};

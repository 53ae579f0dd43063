//! Relay configuration.
//!
//! Everything the relay needs at startup. Defaults are port 5555 and 30
//! concurrent users. Deserializable so that a binary can load it from a
//! file; every field is optional there.

use std::time::Duration;

use chatrelay_protocol::{AnyCodec, NamePolicy};
use serde::{Deserialize, Serialize};

use crate::RelayError;

/// Which codec the relay speaks on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Sentinel-prefixed strings, compatible with legacy peers.
    #[default]
    Legacy,
    /// Tagged JSON objects.
    Json,
}

impl From<WireFormat> for AnyCodec {
    fn from(format: WireFormat) -> Self {
        match format {
            WireFormat::Legacy => AnyCodec::Legacy,
            WireFormat::Json => AnyCodec::Json,
        }
    }
}

/// Configuration for a relay instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Maximum number of concurrent sessions. Connections arriving while
    /// the registry is at this size are closed before the handshake.
    pub max_sessions: usize,

    /// Also enforce `max_sessions` atomically at registration, so that a
    /// burst of simultaneous handshakes can't overshoot it.
    pub hard_limit: bool,

    /// How long a new connection may take to send its display name.
    pub handshake_timeout_ms: u64,

    /// Frames that may queue for one peer before it is evicted as too slow.
    pub outbound_queue: usize,

    /// Display-name rules.
    pub name_policy: NamePolicy,

    /// Wire format spoken to peers.
    pub wire_format: WireFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5555".to_string(),
            max_sessions: 30,
            hard_limit: true,
            handshake_timeout_ms: 10_000,
            outbound_queue: 256,
            name_policy: NamePolicy::default(),
            wire_format: WireFormat::Legacy,
        }
    }
}

impl RelayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Checks the settings that would make the relay unusable.
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_sessions == 0 {
            return Err(RelayError::Config("max_sessions must be at least 1".into()));
        }
        if self.outbound_queue == 0 {
            return Err(RelayError::Config(
                "outbound_queue must be at least 1".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(RelayError::Config(
                "handshake_timeout_ms must be at least 1".into(),
            ));
        }
        let policy = &self.name_policy;
        if policy.min_len == 0 || policy.min_len > policy.max_len {
            return Err(RelayError::Config(format!(
                "name_policy bounds {}..={} are empty",
                policy.min_len, policy.max_len
            )));
        }
        Ok(())
    }
}

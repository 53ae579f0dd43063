//! The broadcast engine: one payload in, one frame queued per live session.
//!
//! Each message is encoded once and offered to every registered session
//! with a non-blocking `try_send`. A session whose queue is closed or full
//! is evicted in the same registry pass (lazy eviction); nobody waits for
//! its own receive loop to notice. Evictions are then announced to the
//! survivors like any other departure, which may in turn evict more
//! sessions, so departures are processed as a work queue.

use std::sync::Arc;

use chatrelay_protocol::{Codec, WireMessage};

use crate::{Registry, SessionHandle};

/// Fans out [`WireMessage`]s to every session in a [`Registry`].
pub struct Broadcaster<K: Codec> {
    registry: Arc<Registry>,
    codec: Arc<K>,
}

impl<K: Codec> Clone for Broadcaster<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<K: Codec> Broadcaster<K> {
    pub fn new(registry: Arc<Registry>, codec: Arc<K>) -> Self {
        Self { registry, codec }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn codec(&self) -> &K {
        &self.codec
    }

    /// Delivers `message` to every registered session, the sender
    /// included. Returns how many sessions accepted it.
    ///
    /// No ack and no retry: a failed delivery evicts that session.
    pub fn broadcast(&self, message: &WireMessage) -> usize {
        let (delivered, evicted) = self.fan_out(message);
        self.drain_departures(departed(&evicted));
        delivered
    }

    /// Announces a newly registered session: roster first, then JOINED.
    pub fn announce_arrival(&self, name: &str) {
        self.broadcast(&WireMessage::roster(self.registry.snapshot()));
        self.broadcast(&WireMessage::joined(name));
    }

    /// Announces a session that has already been removed from the
    /// registry: roster first, then LEFT.
    pub fn announce_departure(&self, name: &str) {
        self.drain_departures(vec![Arc::from(name)]);
    }

    fn drain_departures(&self, mut pending: Vec<Arc<str>>) {
        while let Some(name) = pending.pop() {
            let roster = WireMessage::roster(self.registry.snapshot());
            let (_, evicted) = self.fan_out(&roster);
            pending.extend(departed(&evicted));

            let (_, evicted) = self.fan_out(&WireMessage::left(&*name));
            pending.extend(departed(&evicted));
        }
    }

    /// One registry pass. Returns the delivery count and evicted handles.
    fn fan_out(&self, message: &WireMessage) -> (usize, Vec<SessionHandle>) {
        let frame: Arc<str> = match self.codec.encode(message) {
            Ok(frame) => Arc::from(frame),
            Err(e) => {
                tracing::warn!(error = %e, "dropping broadcast that failed to encode");
                return (0, Vec::new());
            }
        };

        let mut delivered = 0;
        let evicted = self.registry.for_each(|handle| {
            let outcome = handle.try_deliver(&frame);
            if outcome == crate::Delivery::Delivered {
                delivered += 1;
            }
            outcome
        });

        for handle in &evicted {
            tracing::info!(
                session_id = %handle.id(),
                name = %handle.name(),
                "evicted unreachable session"
            );
        }
        tracing::trace!(delivered, evicted = evicted.len(), "broadcast");
        (delivered, evicted)
    }
}

fn departed(evicted: &[SessionHandle]) -> Vec<Arc<str>> {
    evicted.iter().map(|h| Arc::from(h.name())).collect()
}

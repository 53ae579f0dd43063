//! The registry: the single source of truth for who is connected.
//!
//! Every registered session is represented by a [`SessionHandle`]: its id,
//! its display name and the sending half of its bounded outbound queue. The
//! transport itself never enters the registry; it stays with the task that
//! drives the session.
//!
//! # Concurrency
//!
//! All operations take one `std::sync::Mutex` for the duration of the call,
//! so inserts, removals, snapshots and fan-out passes are mutually
//! exclusive. Nothing inside the critical section awaits: delivery is a
//! non-blocking `try_send` into each session's queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::{RegistryError, SessionId};

/// Outcome of a single delivery attempt during [`Registry::for_each`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was queued for the session.
    Delivered,
    /// The session is gone or hopelessly behind; evict it.
    Failed,
}

/// A registered session as seen by everyone other than its own driver.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    name: Arc<str>,
    outbound: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        name: impl Into<Arc<str>>,
        outbound: mpsc::Sender<Arc<str>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            outbound,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a frame without waiting.
    ///
    /// A full queue counts as a failure: a peer that can't keep up with
    /// `capacity` pending frames is treated the same as one that is gone.
    pub fn try_deliver(&self, frame: &Arc<str>) -> Delivery {
        match self.outbound.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(
                    session_id = %self.id,
                    name = %self.name,
                    "outbound queue full"
                );
                Delivery::Failed
            }
            Err(TrySendError::Closed(_)) => Delivery::Failed,
        }
    }
}

/// Thread-safe directory of active sessions, in registration order.
///
/// Shared behind an `Arc` by the acceptor, every session driver and the
/// broadcast engine.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<Vec<SessionHandle>>,
    /// Hard cap enforced inside `insert`. `None` means unbounded.
    limit: Option<usize>,
}

impl Registry {
    /// Creates an empty, unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that refuses inserts beyond `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            limit: Some(limit),
        }
    }

    /// Returns the hard limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    // A panic while holding the lock can't leave the Vec half-modified in a
    // way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Vec<SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session.
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateName`] if the name is already registered
    /// - [`RegistryError::Full`] if the hard limit is reached
    pub fn insert(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.lock();
        if sessions.iter().any(|s| s.name() == handle.name()) {
            return Err(RegistryError::DuplicateName(handle.name().to_owned()));
        }
        if let Some(limit) = self.limit {
            if sessions.len() >= limit {
                return Err(RegistryError::Full(limit));
            }
        }
        tracing::debug!(
            session_id = %handle.id(),
            name = %handle.name(),
            sessions = sessions.len() + 1,
            "session registered"
        );
        sessions.push(handle);
        Ok(())
    }

    /// Removes the session registered under `name`, if any.
    pub fn remove(&self, name: &str) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        let index = sessions.iter().position(|s| s.name() == name)?;
        Some(sessions.remove(index))
    }

    /// Removes the session with the given id, if it is still registered.
    pub fn remove_by_id(&self, id: SessionId) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        let index = sessions.iter().position(|s| s.id() == id)?;
        Some(sessions.remove(index))
    }

    /// Returns the registered names in registration order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.name().to_owned()).collect()
    }

    /// Applies `visit` to every registered session in one critical section.
    ///
    /// Sessions for which `visit` returns [`Delivery::Failed`] are removed
    /// in the same pass and returned. Every other session is visited
    /// exactly once.
    pub fn for_each<F>(&self, mut visit: F) -> Vec<SessionHandle>
    where
        F: FnMut(&SessionHandle) -> Delivery,
    {
        let mut evicted = Vec::new();
        self.lock().retain(|handle| match visit(handle) {
            Delivery::Delivered => true,
            Delivery::Failed => {
                evicted.push(handle.clone());
                false
            }
        });
        evicted
    }

    /// Returns `true` if a session is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|s| s.name() == name)
    }

    /// Removes every session and returns them.
    pub fn clear(&self) -> Vec<SessionHandle> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

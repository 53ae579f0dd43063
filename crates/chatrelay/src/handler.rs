//! Per-connection driver: handshake, admission, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this driver.
//! The flow is:
//!   1. Receive the display name → check it against the name policy
//!   2. Register it → announce roster + JOINED to everyone
//!   3. Loop: flush queued broadcasts, relay the peer's chat lines
//!   4. Tear down → roster + LEFT to everyone still connected

use std::sync::Arc;

use chatrelay_protocol::{Codec, PresenceKind, WireMessage};
use chatrelay_session::{
    CloseReason, Incoming, Session, SessionError, SessionId,
};
use chatrelay_transport::{Connection, TransportError};
use tokio::sync::watch;

use crate::server::ServerState;
use crate::RelayError;

/// Drives a single connection from accept to close.
pub(crate) async fn handle_connection<C, K>(
    conn: C,
    state: Arc<ServerState<K>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    let conn_id = conn.id();
    let mut session = Session::new(conn);
    tracing::debug!(%conn_id, session_id = %session.id(), "handling new connection");

    // --- Step 1: Handshake ---
    let identity = tokio::select! {
        biased;
        () = shutdown_signalled(&mut shutdown) => None,
        identity = session.read_identity(state.config.handshake_timeout()) => {
            Some(identity)
        }
    };
    let Some(identity) = identity else {
        session.close().await;
        return Ok(());
    };
    let name = identity?;

    if let Err(e) = state.config.name_policy.validate(&name) {
        reject(&mut session, state.broadcaster.codec(), e.to_string()).await;
        return Err(e.into());
    }

    // --- Step 2: Admission ---
    if !admit(&mut session, &name, &state, &shutdown).await? {
        return Ok(());
    }
    state.broadcaster.announce_arrival(&name);

    // --- Step 3: Message loop ---
    let reason = loop {
        match session.next_frame(&mut shutdown).await {
            Incoming::Frame(frame) => {
                if let Some(reason) =
                    route_frame(&state, session.id(), &name, &frame)
                {
                    break reason;
                }
            }
            Incoming::Closed(reason) => break reason,
        }
    };

    // --- Step 4: Teardown ---
    session.teardown(&reason, &state.broadcaster).await;
    Ok(())
}

/// Registers the session under `name`.
///
/// Returns `Ok(false)` if the relay started shutting down first; the
/// session is then closed without anyone hearing about it. A relay that
/// flips the flag between the two checks has already cleared the registry
/// or is about to, so the late entry is removed here rather than
/// announced.
async fn admit<C, K>(
    session: &mut Session<C>,
    name: &str,
    state: &ServerState<K>,
    shutdown: &watch::Receiver<bool>,
) -> Result<bool, RelayError>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    if *shutdown.borrow() {
        session.close().await;
        return Ok(false);
    }

    match session.register(
        name.to_owned(),
        state.broadcaster.registry(),
        state.config.outbound_queue,
    ) {
        Ok(()) => {}
        Err(SessionError::Rejected(e)) => {
            reject(session, state.broadcaster.codec(), e.to_string()).await;
            return Err(SessionError::Rejected(e).into());
        }
        Err(e) => {
            session.close().await;
            return Err(e.into());
        }
    }

    if *shutdown.borrow() {
        session
            .teardown(&CloseReason::Shutdown, &state.broadcaster)
            .await;
        return Ok(false);
    }

    tracing::info!(session_id = %session.id(), %name, "session registered");
    Ok(true)
}

/// Acts on one frame from an active peer. Returns `Some` if the session
/// must close.
fn route_frame<K: Codec>(
    state: &ServerState<K>,
    session_id: SessionId,
    name: &str,
    frame: &str,
) -> Option<CloseReason> {
    match state.broadcaster.codec().decode(frame) {
        WireMessage::Chat { body } => {
            let line = WireMessage::chat(format!("{name}: {body}"));
            let delivered = state.broadcaster.broadcast(&line);
            tracing::trace!(%session_id, delivered, "relayed chat line");
            None
        }
        WireMessage::Presence {
            kind: PresenceKind::Left,
            name: claimed,
        } => {
            // The sender leaves regardless of the name it put in the frame.
            if claimed != name {
                tracing::debug!(
                    %session_id,
                    %name,
                    %claimed,
                    "disconnect request names another user"
                );
            }
            Some(CloseReason::DisconnectRequested)
        }
        other => {
            tracing::debug!(
                %session_id,
                kind = ?other.kind(),
                "ignoring control frame from peer"
            );
            None
        }
    }
}

/// Tells the peer why it is being turned away, then closes the transport.
async fn reject<C, K>(session: &mut Session<C>, codec: &K, reason: String)
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    tracing::info!(session_id = %session.id(), %reason, "admission rejected");

    match codec.encode(&WireMessage::rejected(reason)) {
        Ok(frame) => {
            if let Err(e) = session.send_direct(&frame).await {
                tracing::debug!(
                    session_id = %session.id(),
                    error = %e,
                    "failed to deliver rejection"
                );
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to encode rejection");
        }
    }
    session.close().await;
}

/// Resolves once shutdown has been requested or the server is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

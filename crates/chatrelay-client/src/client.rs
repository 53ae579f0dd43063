//! The chat client: one connection to a relay and the task that listens
//! on it.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_protocol::{
    Codec, LegacyCodec, NamePolicy, PresenceKind, WireMessage,
    SERVER_NOTICE_PREFIX,
};
use chatrelay_transport::{
    ClientStream, Connection, TransportError, WebSocketConnection,
};
use tokio::task::JoinHandle;

use crate::{ChatEvents, ClientError};

/// How long [`ChatClient::connect`] waits for the relay to admit or refuse
/// the name.
pub const ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected chat participant.
///
/// Dropping the client stops its listener without notifying the relay;
/// call [`disconnect`](Self::disconnect) to leave cleanly.
pub struct ChatClient<C = WebSocketConnection<ClientStream>, K = LegacyCodec>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    name: String,
    conn: Arc<C>,
    codec: Arc<K>,
    listener: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to the relay at `url` as `name`, speaking the legacy wire
    /// format.
    ///
    /// Spaces are stripped from `name` and the result is checked against
    /// the default [`NamePolicy`] before anything is sent.
    ///
    /// # Errors
    /// [`ClientError::Protocol`] for an invalid name,
    /// [`ClientError::Transport`] if the relay can't be reached, and
    /// [`ClientError::Rejected`] if the relay refuses the name or is full.
    pub async fn connect(
        url: &str,
        name: &str,
        events: impl ChatEvents,
    ) -> Result<Self, ClientError> {
        Self::connect_with_codec(url, name, LegacyCodec, events).await
    }
}

impl<K: Codec> ChatClient<WebSocketConnection<ClientStream>, K> {
    /// Like [`ChatClient::connect`], with an explicit codec.
    pub async fn connect_with_codec(
        url: &str,
        name: &str,
        codec: K,
        events: impl ChatEvents,
    ) -> Result<Self, ClientError> {
        let policy = NamePolicy::default();
        let name = policy.normalize(name);
        policy.validate(&name)?;

        let conn = WebSocketConnection::connect(url).await?;
        Self::join(conn, name, codec, events).await
    }
}

impl<C, K> ChatClient<C, K>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    /// Performs the handshake over an already open connection.
    ///
    /// `name` is sent as is; normalization and validation are the
    /// caller's job here.
    pub async fn join(
        conn: C,
        name: String,
        codec: K,
        mut events: impl ChatEvents,
    ) -> Result<Self, ClientError> {
        conn.send(&name).await?;

        let first = match tokio::time::timeout(ADMISSION_TIMEOUT, conn.recv()).await
        {
            Ok(received) => received?,
            Err(_) => {
                let _ = conn.close().await;
                return Err(ClientError::Timeout(ADMISSION_TIMEOUT));
            }
        };
        let Some(first) = first else {
            return Err(ClientError::Rejected(
                "connection closed by relay".into(),
            ));
        };

        let first = codec.decode(&first);
        if let Some(reason) = refusal(&first) {
            let _ = conn.close().await;
            return Err(ClientError::Rejected(reason.to_owned()));
        }
        tracing::debug!(conn_id = %conn.id(), %name, "joined relay");
        dispatch(first, &name, &mut events);

        let conn = Arc::new(conn);
        let codec = Arc::new(codec);
        let listener = tokio::spawn(listen(
            Arc::clone(&conn),
            Arc::clone(&codec),
            name.clone(),
            events,
        ));

        Ok(Self {
            name,
            conn,
            codec,
            listener,
        })
    }

    /// The display name the relay knows this client by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` once the relay has closed the connection.
    pub fn is_connected(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Sends one chat line. The relay prefixes it with this client's name
    /// and echoes it back along with everyone else's copy.
    pub async fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        let frame = self.codec.encode(&WireMessage::chat(text))?;
        self.conn.send(&frame).await?;
        Ok(())
    }

    /// Asks the relay to remove this client, then closes the connection.
    ///
    /// [`ChatEvents::on_disconnected`] is not raised.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.listener.abort();
        let frame = self.codec.encode(&WireMessage::left(self.name.as_str()))?;
        self.conn.send(&frame).await?;
        self.conn.close().await?;
        tracing::debug!(name = %self.name, "disconnected from relay");
        Ok(())
    }
}

impl<C, K> Drop for ChatClient<C, K>
where
    C: Connection<Error = TransportError>,
    K: Codec,
{
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Reads frames until the connection ends, then raises
/// [`ChatEvents::on_disconnected`].
async fn listen<C, K, E>(conn: Arc<C>, codec: Arc<K>, name: String, mut events: E)
where
    C: Connection<Error = TransportError>,
    K: Codec,
    E: ChatEvents,
{
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => dispatch(codec.decode(&frame), &name, &mut events),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "receive failed");
                break;
            }
        }
    }
    events.on_disconnected();
}

fn dispatch(message: WireMessage, own_name: &str, events: &mut impl ChatEvents) {
    match message {
        WireMessage::Roster { names } => events.on_roster_updated(&names),
        WireMessage::Presence {
            kind: PresenceKind::Joined,
            name,
        } => {
            if name != own_name {
                events.on_user_joined(&name);
            }
        }
        WireMessage::Presence {
            kind: PresenceKind::Left,
            name,
        } => events.on_user_left(&name),
        WireMessage::Chat { body } => events.on_text_received(&body),
        WireMessage::Rejected { reason } => {
            events.on_text_received(&format!("{SERVER_NOTICE_PREFIX}{reason}"));
        }
    }
}

/// The reason, if the relay's first frame is a refusal.
///
/// Relayed chat always carries a `name: ` prefix, so a chat line that
/// starts with the server notice prefix can only be the legacy rendering
/// of a refusal.
fn refusal(first: &WireMessage) -> Option<&str> {
    match first {
        WireMessage::Rejected { reason } => Some(reason),
        WireMessage::Chat { body } => body.strip_prefix(SERVER_NOTICE_PREFIX),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chatrelay_transport::MemoryConnection;
    use tokio::sync::mpsc;

    use super::*;
    use crate::ClientEvent;

    fn events() -> (
        mpsc::UnboundedSender<ClientEvent>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_dispatch_suppresses_own_join() {
        let (mut tx, mut rx) = events();

        dispatch(WireMessage::joined("Alice"), "Alice", &mut tx);
        dispatch(WireMessage::joined("Bob"), "Alice", &mut tx);

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Joined("Bob".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_routes_each_message_kind() {
        let (mut tx, mut rx) = events();

        dispatch(WireMessage::roster(vec!["Alice".into()]), "Alice", &mut tx);
        dispatch(WireMessage::chat("Bob: hi"), "Alice", &mut tx);
        dispatch(WireMessage::left("Bob"), "Alice", &mut tx);
        dispatch(WireMessage::rejected("bye"), "Alice", &mut tx);

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Roster(vec!["Alice".into()]));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Text("Bob: hi".into()));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Left("Bob".into()));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Text("[Server] bye".into()));
    }

    #[test]
    fn test_refusal_recognizes_both_formats() {
        assert_eq!(refusal(&WireMessage::rejected("full")), Some("full"));
        assert_eq!(
            refusal(&WireMessage::chat("[Server] relay is full (30 sessions)")),
            Some("relay is full (30 sessions)")
        );
        assert_eq!(refusal(&WireMessage::chat("Bob: [Server] fake")), None);
        assert_eq!(refusal(&WireMessage::roster(Vec::new())), None);
    }

    #[tokio::test]
    async fn test_join_sends_name_and_listens() {
        let (client_end, relay_end) = MemoryConnection::pair();
        let (tx, mut rx) = events();

        relay_end.send("$$_UPDATE_USERLIST_$$»Alice").await.unwrap();
        let client = ChatClient::join(client_end, "Alice".into(), LegacyCodec, tx)
            .await
            .unwrap();

        assert_eq!(relay_end.recv().await.unwrap().as_deref(), Some("Alice"));
        assert_eq!(rx.recv().await.unwrap(), ClientEvent::Roster(vec!["Alice".into()]));

        client.send_chat("hello").await.unwrap();
        assert_eq!(relay_end.recv().await.unwrap().as_deref(), Some("hello"));

        relay_end.send("Alice: hello").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ClientEvent::Text("Alice: hello".into()));

        relay_end.close().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ClientEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_join_reports_legacy_refusal() {
        let (client_end, relay_end) = MemoryConnection::pair();
        let (tx, _rx) = events();

        relay_end
            .send("[Server] display name \"Alice\" is already in use")
            .await
            .unwrap();
        let result = ChatClient::join(client_end, "Alice".into(), LegacyCodec, tx).await;

        assert!(
            matches!(&result, Err(ClientError::Rejected(r)) if r.contains("already in use")),
            "unexpected result"
        );
    }

    #[tokio::test]
    async fn test_join_reports_silent_close_as_refusal() {
        let (client_end, relay_end) = MemoryConnection::pair();
        let (tx, _rx) = events();
        relay_end.close().await.unwrap();

        let result = ChatClient::join(client_end, "Alice".into(), LegacyCodec, tx).await;

        assert!(matches!(result, Err(ClientError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_disconnect_sends_leave_request() {
        let (client_end, relay_end) = MemoryConnection::pair();
        let (tx, mut rx) = events();
        relay_end.send("$$_UPDATE_USERLIST_$$»Alice").await.unwrap();
        let client = ChatClient::join(client_end, "Alice".into(), LegacyCodec, tx)
            .await
            .unwrap();
        relay_end.recv().await.unwrap();

        client.disconnect().await.unwrap();

        assert_eq!(
            relay_end.recv().await.unwrap().as_deref(),
            Some("$$_U_RMV_USER_$$»Alice")
        );
        assert!(relay_end.recv().await.unwrap().is_none());
        assert_eq!(rx.recv().await.unwrap(), ClientEvent::Roster(vec!["Alice".into()]));
        assert_eq!(rx.recv().await, None, "no Disconnected after a clean leave");
    }
}

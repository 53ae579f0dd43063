//! Callbacks the client raises for whatever presents the chat.

use chatrelay_protocol::{presence_line, PresenceKind};
use tokio::sync::mpsc;

/// Receives everything the relay tells a connected client.
///
/// Callbacks run on the client's listener task, one at a time and in
/// arrival order. Keep them short; a slow callback delays every later
/// event.
pub trait ChatEvents: Send + 'static {
    /// A chat line, already prefixed with its sender, or a server notice.
    fn on_text_received(&mut self, line: &str);

    /// The full list of connected names, in join order.
    fn on_roster_updated(&mut self, names: &[String]);

    /// Someone else joined. Renders the classic server notice by default.
    fn on_user_joined(&mut self, name: &str) {
        self.on_text_received(&presence_line(PresenceKind::Joined, name));
    }

    /// Someone left. Renders the classic server notice by default.
    fn on_user_left(&mut self, name: &str) {
        self.on_text_received(&presence_line(PresenceKind::Left, name));
    }

    /// The relay closed the connection, or it broke. Not raised after
    /// [`ChatClient::disconnect`](crate::ChatClient::disconnect).
    fn on_disconnected(&mut self) {}
}

/// One callback, as a value. See the [`ChatEvents`] impl for
/// [`mpsc::UnboundedSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Text(String),
    Roster(Vec<String>),
    Joined(String),
    Left(String),
    Disconnected,
}

/// Forwards every callback into a channel, so the events can be consumed
/// as a stream. Events sent after the receiver is dropped are discarded.
impl ChatEvents for mpsc::UnboundedSender<ClientEvent> {
    fn on_text_received(&mut self, line: &str) {
        let _ = self.send(ClientEvent::Text(line.to_owned()));
    }

    fn on_roster_updated(&mut self, names: &[String]) {
        let _ = self.send(ClientEvent::Roster(names.to_vec()));
    }

    fn on_user_joined(&mut self, name: &str) {
        let _ = self.send(ClientEvent::Joined(name.to_owned()));
    }

    fn on_user_left(&mut self, name: &str) {
        let _ = self.send(ClientEvent::Left(name.to_owned()));
    }

    fn on_disconnected(&mut self) {
        let _ = self.send(ClientEvent::Disconnected);
    }
}

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use roomcast_core::models::{ClientId, ClientInfo, Session, SessionKind};

use crate::names;
use crate::wire::CloseCode;

/// Frames the gateway pushes onto a socket's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    Close(CloseCode),
}

/// One connected socket: identity plus the outbound frame queue. Owned by
/// the `ClientManager`; rooms only ever see the `ClientId`.
pub struct Client {
    pub id: ClientId,
    session: RwLock<Session>,
    room: RwLock<Option<String>>,
    sender: mpsc::UnboundedSender<Frame>,
}

impl Client {
    #[must_use]
    pub fn new(session: Session, sender: mpsc::UnboundedSender<Frame>) -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::new(),
            session: RwLock::new(session),
            room: RwLock::new(None),
            sender,
        })
    }

    /// Send a frame to this socket. Returns false when the connection's
    /// writer is gone.
    pub fn send(&self, frame: Frame) -> bool {
        if self.sender.send(frame).is_err() {
            debug!(client = %self.id, "Dropping frame for closed connection");
            return false;
        }
        true
    }

    pub fn send_text(&self, text: String) -> bool {
        self.send(Frame::Text(text))
    }

    #[must_use]
    pub fn room(&self) -> Option<String> {
        self.room.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub(crate) fn set_room(&self, name: &str) {
        *self.room.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(name.to_string());
    }

    #[must_use]
    pub fn session_token(&self) -> String {
        self.session.read().unwrap_or_else(std::sync::PoisonError::into_inner).token_id.clone()
    }

    pub(crate) fn replace_session(&self, session: Session) {
        *self.session.write().unwrap_or_else(std::sync::PoisonError::into_inner) = session;
    }

    /// Identity payload for join/update requests. Precedence: registered
    /// user id, then the session's unregistered username, then a generated
    /// pronounceable name (stored back so it stays stable for the
    /// connection).
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        let mut info = ClientInfo::new(self.id.clone());
        let mut session = self.session.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        match &mut session.kind {
            SessionKind::Registered { user_id } => {
                info.user_id = Some(user_id.clone());
            }
            SessionKind::Unregistered { username } => {
                if username.is_none() {
                    let generated = names::pronounceable();
                    warn!(
                        client = %self.id,
                        name = %generated,
                        "Session carries no username; generated one"
                    );
                    *username = Some(generated);
                }
                info.username.clone_from(username);
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_core::models::UserId;

    fn client(session: Session) -> (Arc<Client>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Client::new(session, tx), rx)
    }

    #[test]
    fn test_client_info_registered() {
        let uid = UserId::new();
        let (c, _rx) = client(Session::registered("tok", uid.clone()));
        let info = c.client_info();
        assert_eq!(info.user_id, Some(uid));
        assert!(info.username.is_none());
    }

    #[test]
    fn test_client_info_unregistered_username() {
        let (c, _rx) = client(Session::unregistered("tok", Some("guest".to_string())));
        let info = c.client_info();
        assert!(info.user_id.is_none());
        assert_eq!(info.username.as_deref(), Some("guest"));
    }

    #[test]
    fn test_client_info_generated_name_is_stable() {
        let (c, _rx) = client(Session::unregistered("tok", None));
        let first = c.client_info().username.expect("generated");
        let second = c.client_info().username.expect("generated");
        assert_eq!(first, second);
    }

    #[test]
    fn test_send_after_receiver_drop() {
        let (c, rx) = client(Session::unregistered("tok", None));
        drop(rx);
        assert!(!c.send_text("hello".to_string()));
    }
}

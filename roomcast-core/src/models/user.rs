use serde::{Deserialize, Serialize};

use super::id::UserId;

/// The slice of the account system this core needs. Account storage itself
/// is an external collaborator behind the `UserStore` trait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Opaque session identity carried by the socket upgrade, resolved
/// out-of-band (cookie) before the gateway ever sees the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable token identity; `on_user_modified` matches connections by it.
    pub token_id: String,
    #[serde(flatten)]
    pub kind: SessionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionKind {
    Registered { user_id: UserId },
    Unregistered { username: Option<String> },
}

impl Session {
    #[must_use]
    pub fn registered(token_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            token_id: token_id.into(),
            kind: SessionKind::Registered { user_id },
        }
    }

    #[must_use]
    pub fn unregistered(token_id: impl Into<String>, username: Option<String>) -> Self {
        Self {
            token_id: token_id.into(),
            kind: SessionKind::Unregistered { username },
        }
    }

    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match &self.kind {
            SessionKind::Registered { user_id } => Some(user_id),
            SessionKind::Unregistered { .. } => None,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::request::RoomEvent;
use super::room_user::UserSummary;

/// Messages published on a room's bus channel and relayed verbatim to
/// every socket joined to that room. Sync deltas are built dynamically
/// from the dirty field set, so their payload is an open map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RoomMessage {
    Sync {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    Event {
        #[serde(flatten)]
        event: RoomEvent,
    },
    Chat {
        from: UserSummary,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// The owning node is dropping this room; peers disconnect their clients.
    Unload,
    /// Targeted per-client payload; the receiving gateway marks `isYou`.
    User {
        user: Value,
    },
}

impl RoomMessage {
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Event { .. } => "event",
            Self::Chat { .. } => "chat",
            Self::Unload => "unload",
            Self::User { .. } => "user",
        }
    }
}

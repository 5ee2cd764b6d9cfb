use async_trait::async_trait;

use crate::Result;

/// Channel for room-scoped traffic (sync deltas, events, chat, unload)
#[must_use]
pub fn room_channel(name: &str) -> String {
    format!("room:{name}")
}

/// Key holding the most recent full snapshot of a room, for cold-start
/// full-syncs on join and best-effort recovery on room load.
#[must_use]
pub fn room_sync_key(name: &str) -> String {
    format!("room-sync:{name}")
}

/// Global channel; payloads are relayed to every connected socket.
pub const ANNOUNCEMENT_CHANNEL: &str = "announcement";

/// A message delivered from the bus to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// The inter-process coordination contract: pub/sub channels plus a shared
/// key/value store for full-sync snapshots. Implementations live in
/// `roomcast-cluster`; this trait keeps the room engine free of any
/// transport dependency.
///
/// Delivery is best-effort with per-channel ordering. Subscribed messages
/// arrive on the process-wide receiver handed out at construction time.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Start receiving messages for a channel. Idempotent.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn set_key(&self, key: &str, value: String) -> Result<()>;

    async fn get_key(&self, key: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(room_channel("lobby"), "room:lobby");
        assert_eq!(room_sync_key("lobby"), "room-sync:lobby");
        assert_eq!(ANNOUNCEMENT_CHANNEL, "announcement");
    }
}

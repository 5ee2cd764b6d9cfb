use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{QueueMode, Room, RoomDirectory, RoomTuning, Visibility};
use crate::bus::{room_sync_key, MessageBus};
use crate::config::RoomConfig;
use crate::extractor::InfoExtractor;
use crate::models::{Grants, User};
use crate::users::UserStore;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CreateRoomOptions {
    pub name: String,
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
    pub is_temporary: bool,
    pub queue_mode: QueueMode,
    pub owner: Option<User>,
    pub grants: Option<Grants>,
}

impl CreateRoomOptions {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Owns every room instance loaded on this node: lookup, creation with
/// best-effort snapshot recovery, the tick loop, and staleness eviction.
pub struct RoomManager {
    rooms: DashMap<String, Arc<Room>>,
    bus: Arc<dyn MessageBus>,
    extractor: Arc<dyn InfoExtractor>,
    users: Arc<dyn UserStore>,
    config: RoomConfig,
}

impl RoomManager {
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        extractor: Arc<dyn InfoExtractor>,
        users: Arc<dyn UserStore>,
        config: RoomConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            bus,
            extractor,
            users,
            config,
        })
    }

    /// Create a room on this node, recovering whatever the bus snapshot
    /// key still holds for the name.
    pub async fn create_room(&self, options: CreateRoomOptions) -> Result<Arc<Room>> {
        let name = options.name.clone();
        if name.is_empty() {
            return Err(Error::InvalidRequest("room name must not be empty".to_string()));
        }
        if self.rooms.contains_key(&name) {
            return Err(Error::RoomAlreadyExists(name));
        }

        let room = Room::new(
            options,
            Arc::clone(&self.bus),
            Arc::clone(&self.extractor),
            Arc::clone(&self.users),
            RoomTuning::from(&self.config),
        );

        match self.bus.get_key(&room_sync_key(&name)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(snapshot) => {
                    debug!(room = %name, "Recovered room state from snapshot key");
                    room.hydrate(&snapshot).await;
                }
                Err(e) => {
                    warn!(room = %name, error = %e, "Ignoring malformed room snapshot");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(room = %name, error = %e, "Snapshot recovery unavailable");
            }
        }

        self.rooms.insert(name.clone(), Arc::clone(&room));
        info!(room = %name, "Room created");
        Ok(room)
    }

    pub fn get_room(&self, name: &str) -> Result<Arc<Room>> {
        self.rooms
            .get(name)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| Error::RoomNotFound(name.to_string()))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Start the periodic update and eviction loops. Both stop when the
    /// token is cancelled.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let manager = Arc::clone(&self);
        let tick_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(manager.config.tick_interval_seconds));
            loop {
                tokio::select! {
                    () = tick_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let rooms: Vec<Arc<Room>> =
                            manager.rooms.iter().map(|r| Arc::clone(&r)).collect();
                        for room in rooms {
                            room.tick().await;
                        }
                    }
                }
            }
        });

        let manager = self;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(manager.config.unload_sweep_seconds));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => manager.sweep_stale_rooms().await,
                }
            }
        });
    }

    /// Unload every room whose keep-alive has lapsed.
    pub async fn sweep_stale_rooms(&self) {
        let rooms: Vec<(String, Arc<Room>)> = self
            .rooms
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(&r)))
            .collect();

        for (name, room) in rooms {
            if room.is_stale().await {
                room.on_before_unload().await;
                self.rooms.remove(&name);
                info!(room = %name, "Dropped stale room");
            }
        }
    }
}

#[async_trait]
impl RoomDirectory for RoomManager {
    async fn room(&self, name: &str) -> Result<Arc<Room>> {
        self.get_room(name)
    }
}

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use roomcast_core::bus::{room_channel, room_sync_key, BusMessage, MessageBus, ANNOUNCEMENT_CHANNEL};
use roomcast_core::models::{ClientId, ClientInfo, RoomRequest, Session};
use roomcast_core::room::{RequestContext, RoomDirectory};
use roomcast_core::Result;

use crate::client::{Client, Frame};
use crate::wire::{ClientFrame, CloseCode};

/// Process-wide registry of client sockets: membership bookkeeping,
/// full-sync on join, translation of wire frames into room requests, and
/// fan-out of bus traffic to local sockets.
pub struct ClientManager {
    /// Every open socket on this process
    connections: DashMap<ClientId, Arc<Client>>,
    /// Local membership per room
    room_joins: DashMap<String, Vec<ClientId>>,
    /// Last-known snapshot per room, kept fresh from sync deltas and used
    /// for new-joiner full-syncs
    room_states: DashMap<String, Map<String, Value>>,
    bus: Arc<dyn MessageBus>,
    directory: Arc<dyn RoomDirectory>,
}

impl ClientManager {
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, directory: Arc<dyn RoomDirectory>) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            room_joins: DashMap::new(),
            room_states: DashMap::new(),
            bus,
            directory,
        })
    }

    /// Consume bus messages until cancelled. Also subscribes the global
    /// announcement channel.
    pub fn start(
        self: Arc<Self>,
        mut bus_rx: mpsc::UnboundedReceiver<BusMessage>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            if let Err(e) = self.bus.subscribe(ANNOUNCEMENT_CHANNEL).await {
                warn!(error = %e, "Failed to subscribe announcement channel");
            }
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = bus_rx.recv() => match msg {
                        Some(msg) => self.on_bus_message(msg).await,
                        None => break,
                    },
                }
            }
        });
    }

    /// Ping every connection on a fixed cadence.
    pub fn start_keepalive(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        for entry in self.connections.iter() {
                            entry.value().send(Frame::Ping);
                        }
                    }
                }
            }
        });
    }

    pub fn register(&self, client: Arc<Client>) {
        self.connections.insert(client.id.clone(), client);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Join a client to a room: resolve it, send the full snapshot,
    /// subscribe the room channel, record membership, and submit the
    /// join request.
    pub async fn join_room(&self, client: &Arc<Client>, name: &str) -> Result<()> {
        let room = self.directory.room(name).await?;
        client.set_room(name);

        let snapshot = self.full_snapshot(name, || room.snapshot_json()).await;
        let mut frame = Map::new();
        frame.insert("action".to_string(), Value::String("sync".to_string()));
        frame.extend(snapshot);
        client.send_text(Value::Object(frame).to_string());

        if let Err(e) = self.bus.subscribe(&room_channel(name)).await {
            warn!(room = name, error = %e, "Failed to subscribe room channel");
        }

        self.room_joins
            .entry(name.to_string())
            .or_default()
            .push(client.id.clone());

        room.process_request(
            &RequestContext::new(client.id.clone()),
            RoomRequest::Join {
                info: client.client_info(),
            },
        )
        .await?;

        info!(room = name, client = %client.id, "Socket joined room");
        Ok(())
    }

    /// Cached snapshot, falling back to the bus key, falling back to the
    /// live room (fresh rooms have not synced yet).
    async fn full_snapshot<F, Fut>(&self, name: &str, live: F) -> Map<String, Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Map<String, Value>>,
    {
        if let Some(cached) = self.room_states.get(name) {
            return cached.clone();
        }
        if let Ok(Some(raw)) = self.bus.get_key(&room_sync_key(name)).await {
            if let Ok(snapshot) = serde_json::from_str::<Map<String, Value>>(&raw) {
                self.room_states.insert(name.to_string(), snapshot.clone());
                return snapshot;
            }
        }
        let snapshot = live().await;
        self.room_states.insert(name.to_string(), snapshot.clone());
        snapshot
    }

    /// Translate one wire frame into a room request and route it. Errors
    /// are logged; the socket stays open.
    pub async fn on_message(&self, client: &Arc<Client>, text: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client = %client.id, error = %e, "Malformed client message");
                return;
            }
        };

        let request = match frame {
            ClientFrame::Play => RoomRequest::Playback { state: true },
            ClientFrame::Pause => RoomRequest::Playback { state: false },
            ClientFrame::Skip => RoomRequest::Skip,
            ClientFrame::Seek { value } => RoomRequest::Seek { value },
            ClientFrame::QueueMove { from_idx, to_idx } => {
                RoomRequest::Order { from_idx, to_idx }
            }
            ClientFrame::Chat { text } => RoomRequest::Chat { text },
            ClientFrame::Status { status } => {
                let mut info = ClientInfo::new(client.id.clone());
                info.status = Some(status);
                RoomRequest::UpdateUser { info }
            }
            ClientFrame::SetRole { client_id, role } => RoomRequest::Promote {
                target_client_id: client_id,
                role,
            },
            ClientFrame::Undo { event } => RoomRequest::Undo {
                event: Box::new(event),
            },
            ClientFrame::Kickme => {
                client.send(Frame::Close(CloseCode::Unknown));
                return;
            }
            ClientFrame::Unknown => {
                warn!(client = %client.id, "Unrecognized client action");
                return;
            }
        };

        self.make_room_request(client, request).await;
    }

    async fn make_room_request(&self, client: &Arc<Client>, request: RoomRequest) {
        let Some(name) = client.room() else {
            warn!(client = %client.id, "Request from a socket that never joined a room");
            return;
        };
        match self.directory.room(&name).await {
            Ok(room) => {
                let ctx = RequestContext::new(client.id.clone());
                if let Err(e) = room.process_request(&ctx, request).await {
                    warn!(room = %name, client = %client.id, error = %e, "Room request failed");
                }
            }
            Err(e) => {
                warn!(room = %name, client = %client.id, error = %e, "Room lookup failed");
            }
        }
    }

    /// Socket closed: drop it from the registries and submit the leave.
    pub async fn on_close(&self, client: &Arc<Client>) {
        self.connections.remove(&client.id);
        let Some(name) = client.room() else {
            return;
        };

        if let Some(mut joined) = self.room_joins.get_mut(&name) {
            joined.retain(|id| id != &client.id);
        }
        self.room_joins.remove_if(&name, |_, joined| joined.is_empty());

        match self.directory.room(&name).await {
            Ok(room) => {
                let ctx = RequestContext::new(client.id.clone());
                if let Err(e) = room.process_request(&ctx, RoomRequest::Leave).await {
                    warn!(room = %name, client = %client.id, error = %e, "Leave request failed");
                }
            }
            Err(_) => {
                debug!(room = %name, client = %client.id, "Room gone before leave");
            }
        }
    }

    /// Route one bus message to local sockets.
    pub async fn on_bus_message(&self, msg: BusMessage) {
        if msg.channel == ANNOUNCEMENT_CHANNEL {
            for entry in self.connections.iter() {
                entry.value().send_text(msg.payload.clone());
            }
            return;
        }

        let Some(name) = msg.channel.strip_prefix("room:") else {
            warn!(channel = %msg.channel, "Message on unexpected channel");
            return;
        };

        #[derive(serde::Deserialize)]
        struct Probe {
            action: String,
        }
        let action = match serde_json::from_str::<Probe>(&msg.payload) {
            Ok(probe) => probe.action,
            Err(e) => {
                warn!(channel = %msg.channel, error = %e, "Unparseable bus payload");
                return;
            }
        };

        match action.as_str() {
            "sync" => {
                self.merge_delta(name, &msg.payload).await;
                self.broadcast_to_room(name, &msg.payload);
            }
            "event" | "chat" => self.broadcast_to_room(name, &msg.payload),
            "unload" => self.unload_room(name),
            "user" => self.send_targeted(name, &msg.payload),
            other => {
                warn!(room = name, action = other, "Unhandled room message action");
            }
        }
    }

    /// Fold a sync delta into the cached snapshot (loading it from the bus
    /// key first if this node has never seen the room).
    async fn merge_delta(&self, name: &str, payload: &str) {
        let Ok(delta) = serde_json::from_str::<Map<String, Value>>(payload) else {
            return;
        };

        if !self.room_states.contains_key(name) {
            if let Ok(Some(raw)) = self.bus.get_key(&room_sync_key(name)).await {
                if let Ok(snapshot) = serde_json::from_str::<Map<String, Value>>(&raw) {
                    self.room_states.insert(name.to_string(), snapshot);
                }
            }
        }

        let mut cached = self.room_states.entry(name.to_string()).or_default();
        for (key, value) in delta {
            if key != "action" {
                cached.insert(key, value);
            }
        }
    }

    /// Relay raw bus text to every local socket joined to the room,
    /// dropping sockets whose writers are gone.
    fn broadcast_to_room(&self, name: &str, payload: &str) {
        let Some(ids) = self.room_joins.get(name).map(|j| j.clone()) else {
            return;
        };
        let mut dead = Vec::new();
        for id in ids {
            if let Some(client) = self.connections.get(&id) {
                if !client.send_text(payload.to_string()) {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.connections.remove(&id);
            if let Some(mut joined) = self.room_joins.get_mut(name) {
                joined.retain(|j| j != &id);
            }
        }
    }

    fn unload_room(&self, name: &str) {
        info!(room = name, "Room unloaded; disconnecting local sockets");
        if let Some((_, ids)) = self.room_joins.remove(name) {
            for id in ids {
                if let Some(client) = self.connections.get(&id) {
                    client.send(Frame::Close(CloseCode::RoomUnloaded));
                }
            }
        }
        self.room_states.remove(name);
    }

    /// `{action:"user"}` is targeted: only the client whose id matches
    /// gets it, with `isYou` set on its copy.
    fn send_targeted(&self, name: &str, payload: &str) {
        let Ok(mut value) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        let Some(target) = value
            .get("user")
            .and_then(|u| u.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            warn!(room = name, "User message without a user id");
            return;
        };

        if let Some(user) = value.get_mut("user") {
            user["isYou"] = Value::Bool(true);
        }
        let target = ClientId::from_string(target);
        let joined = self
            .room_joins
            .get(name)
            .is_some_and(|j| j.contains(&target));
        if joined {
            if let Some(client) = self.connections.get(&target) {
                client.send_text(value.to_string());
            }
        }
    }

    /// A session changed (login, logout, rename): refresh every connection
    /// carrying it and push the new identity into their rooms.
    pub async fn on_user_modified(&self, session: &Session) {
        let matching: Vec<Arc<Client>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().session_token() == session.token_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for client in matching {
            client.replace_session(session.clone());
            if client.room().is_some() {
                let info = client.client_info();
                self.make_room_request(&client, RoomRequest::UpdateUser { info })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roomcast_core::config::RoomConfig;
    use roomcast_core::room::{CreateRoomOptions, Room, RoomTuning};
    use roomcast_core::test_helpers::{RecordingBus, StubExtractor};
    use roomcast_core::users::StaticUserStore;
    use roomcast_core::Error;

    struct OneRoom(Arc<Room>);

    #[async_trait]
    impl RoomDirectory for OneRoom {
        async fn room(&self, name: &str) -> roomcast_core::Result<Arc<Room>> {
            if name == self.0.name() {
                Ok(Arc::clone(&self.0))
            } else {
                Err(Error::RoomNotFound(name.to_string()))
            }
        }
    }

    fn setup() -> (Arc<ClientManager>, Arc<RecordingBus>) {
        let bus = RecordingBus::new();
        let room = Room::new(
            CreateRoomOptions::named("lobby"),
            bus.clone(),
            StubExtractor::new(),
            Arc::new(StaticUserStore::new()),
            RoomTuning::from(&RoomConfig::default()),
        );
        let manager = ClientManager::new(bus.clone(), Arc::new(OneRoom(room)));
        (manager, bus)
    }

    fn connect(
        manager: &Arc<ClientManager>,
    ) -> (Arc<Client>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client::new(
            roomcast_core::models::Session::unregistered("tok", Some("guest".to_string())),
            tx,
        );
        manager.register(Arc::clone(&client));
        (client, rx)
    }

    fn drain_texts(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Text(text) = frame {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_join_subscribes_and_records_membership() {
        let (manager, bus) = setup();
        let (client, mut rx) = connect(&manager);

        manager.join_room(&client, "lobby").await.unwrap();
        assert!(bus.is_subscribed(&room_channel("lobby")));

        let texts = drain_texts(&mut rx);
        let first: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(first["action"], "sync");
        assert!(first.get("grants").is_some());
    }

    #[tokio::test]
    async fn test_user_message_is_targeted_with_is_you() {
        let (manager, _bus) = setup();
        let (c1, mut rx1) = connect(&manager);
        let (c2, mut rx2) = connect(&manager);
        manager.join_room(&c1, "lobby").await.unwrap();
        manager.join_room(&c2, "lobby").await.unwrap();
        drain_texts(&mut rx1);
        drain_texts(&mut rx2);

        let payload = format!(
            r#"{{"action":"user","user":{{"id":"{}","name":"guest"}}}}"#,
            c1.id
        );
        manager
            .on_bus_message(BusMessage {
                channel: room_channel("lobby"),
                payload,
            })
            .await;

        let texts = drain_texts(&mut rx1);
        assert_eq!(texts.len(), 1);
        let value: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(value["user"]["isYou"], true);

        assert!(drain_texts(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_announcement_reaches_every_connection() {
        let (manager, _bus) = setup();
        let (c1, mut rx1) = connect(&manager);
        let (c2, mut rx2) = connect(&manager);
        manager.join_room(&c1, "lobby").await.unwrap();
        drain_texts(&mut rx1);

        manager
            .on_bus_message(BusMessage {
                channel: ANNOUNCEMENT_CHANNEL.to_string(),
                payload: r#"{"action":"announcement","text":"maintenance"}"#.to_string(),
            })
            .await;

        assert_eq!(drain_texts(&mut rx1).len(), 1);
        // c2 never joined a room but still hears announcements
        assert_eq!(drain_texts(&mut rx2).len(), 1);
        drop(c2);
    }

    #[tokio::test]
    async fn test_sync_delta_merges_into_cached_snapshot() {
        let (manager, _bus) = setup();
        let (c1, mut rx1) = connect(&manager);
        manager.join_room(&c1, "lobby").await.unwrap();
        drain_texts(&mut rx1);

        manager
            .on_bus_message(BusMessage {
                channel: room_channel("lobby"),
                payload: r#"{"action":"sync","isPlaying":true}"#.to_string(),
            })
            .await;

        // A later joiner gets the merged snapshot
        let (c2, mut rx2) = connect(&manager);
        manager.join_room(&c2, "lobby").await.unwrap();
        let texts = drain_texts(&mut rx2);
        let first: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(first["action"], "sync");
        assert_eq!(first["isPlaying"], true);
    }

    #[tokio::test]
    async fn test_on_user_modified_updates_matching_connections() {
        let (manager, _bus) = setup();
        let (c1, mut rx1) = connect(&manager);
        manager.join_room(&c1, "lobby").await.unwrap();
        drain_texts(&mut rx1);

        let renamed =
            roomcast_core::models::Session::unregistered("tok", Some("fresh-name".to_string()));
        manager.on_user_modified(&renamed).await;

        assert_eq!(c1.session_token(), "tok");
        assert_eq!(c1.client_info().username.as_deref(), Some("fresh-name"));

        // A session with a different token leaves the connection alone
        let other =
            roomcast_core::models::Session::unregistered("other", Some("stranger".to_string()));
        manager.on_user_modified(&other).await;
        assert_eq!(c1.client_info().username.as_deref(), Some("fresh-name"));
    }
}

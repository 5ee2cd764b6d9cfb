//! Two gateways on a shared bus, simulating sibling processes: deltas
//! published by the room's node reach sockets attached to the other node.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roomcast_cluster::MemoryBusCore;
use roomcast_core::config::RoomConfig;
use roomcast_core::models::{RoomRequest, Session};
use roomcast_core::room::{CreateRoomOptions, RequestContext, RoomDirectory, RoomManager};
use roomcast_core::test_helpers::{test_video, StubExtractor};
use roomcast_core::users::StaticUserStore;
use roomcast_gateway::client::{Client, Frame};
use roomcast_gateway::manager::ClientManager;
use roomcast_gateway::wire::CloseCode;

struct Node {
    clients: Arc<ClientManager>,
}

fn spawn_node(
    core: &Arc<MemoryBusCore>,
    directory: Arc<dyn RoomDirectory>,
    cancel: &CancellationToken,
) -> Node {
    let (bus, bus_rx) = MemoryBusCore::attach(core);
    let clients = ClientManager::new(bus, directory);
    Arc::clone(&clients).start(bus_rx, cancel.clone());
    Node { clients }
}

fn socket(session_token: &str) -> (Arc<Client>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = Client::new(Session::unregistered(session_token, Some("guest".into())), tx);
    (client, rx)
}

async fn recv_text(rx: &mut mpsc::UnboundedReceiver<Frame>) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("connection open");
        if let Frame::Text(text) = frame {
            return text;
        }
    }
}

fn rooms_on(core: &Arc<MemoryBusCore>) -> Arc<RoomManager> {
    let (bus, _rx) = MemoryBusCore::attach(core);
    let extractor = StubExtractor::with_videos([test_video("youtube", "A", 100.0)]);
    RoomManager::new(
        bus,
        extractor,
        Arc::new(StaticUserStore::new()),
        RoomConfig::default(),
    )
}

#[tokio::test]
async fn sync_delta_reaches_sibling_node() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();

    // The room lives on node 1; node 2 only relays bus traffic.
    let rooms = rooms_on(&core);
    rooms
        .create_room(CreateRoomOptions::named("lobby"))
        .await
        .unwrap();

    let node1 = spawn_node(&core, rooms.clone(), &cancel);
    let node2 = spawn_node(&core, rooms.clone(), &cancel);

    let (c1, mut rx1) = socket("tok-n1");
    node1.clients.register(Arc::clone(&c1));
    node1.clients.join_room(&c1, "lobby").await.unwrap();

    let (c2, mut rx2) = socket("tok-n2");
    node2.clients.register(Arc::clone(&c2));
    node2.clients.join_room(&c2, "lobby").await.unwrap();

    // Full sync lands first on the new socket
    let first = recv_text(&mut rx2).await;
    let first: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(first["action"], "sync");
    assert!(first.get("queue").is_some());
    assert!(first.get("isPlaying").is_some());

    // A play on node 1 fans out to node 2's socket as a sync delta
    let room = rooms.get_room("lobby").unwrap();
    room.process_request(
        &RequestContext::new(c1.id.clone()),
        RoomRequest::Playback { state: true },
    )
    .await
    .unwrap();
    room.sync().await;

    let delta = loop {
        let text = recv_text(&mut rx2).await;
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        if value["action"] == "sync" && value.get("isPlaying").is_some() {
            break value;
        }
    };
    assert_eq!(delta["isPlaying"], true);

    // Node 1's own socket hears it too
    let delta = loop {
        let text = recv_text(&mut rx1).await;
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        if value["action"] == "sync" && value.get("isPlaying").is_some() {
            break value;
        }
    };
    assert_eq!(delta["isPlaying"], true);

    cancel.cancel();
}

#[tokio::test]
async fn join_sends_full_sync_before_deltas() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();
    let rooms = rooms_on(&core);
    rooms
        .create_room(CreateRoomOptions::named("lobby"))
        .await
        .unwrap();
    let node = spawn_node(&core, rooms.clone(), &cancel);

    let (client, mut rx) = socket("tok");
    node.clients.register(Arc::clone(&client));
    node.clients.join_room(&client, "lobby").await.unwrap();

    let first = recv_text(&mut rx).await;
    let first: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(first["action"], "sync");
    // The join snapshot is complete, not a delta
    for field in [
        "name",
        "title",
        "queue",
        "currentSource",
        "isPlaying",
        "playbackPosition",
        "users",
        "voteCounts",
        "grants",
    ] {
        assert!(first.get(field).is_some(), "full sync missing {field}");
    }

    cancel.cancel();
}

#[tokio::test]
async fn join_unknown_room_fails() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();
    let rooms = rooms_on(&core);
    let node = spawn_node(&core, rooms, &cancel);

    let (client, _rx) = socket("tok");
    node.clients.register(Arc::clone(&client));
    let err = node.clients.join_room(&client, "nowhere").await.unwrap_err();
    assert!(matches!(err, roomcast_core::Error::RoomNotFound(_)));

    cancel.cancel();
}

#[tokio::test]
async fn unload_disconnects_local_sockets() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();
    let rooms = rooms_on(&core);
    rooms
        .create_room(CreateRoomOptions::named("lobby"))
        .await
        .unwrap();
    let node = spawn_node(&core, rooms.clone(), &cancel);

    let (client, mut rx) = socket("tok");
    node.clients.register(Arc::clone(&client));
    node.clients.join_room(&client, "lobby").await.unwrap();

    let room = rooms.get_room("lobby").unwrap();
    room.on_before_unload().await;

    let close = loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("connection open");
        if let Frame::Close(code) = frame {
            break code;
        }
    };
    assert_eq!(close, CloseCode::RoomUnloaded);

    cancel.cancel();
}

#[tokio::test]
async fn chat_is_relayed_to_room_members() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();
    let rooms = rooms_on(&core);
    rooms
        .create_room(CreateRoomOptions::named("lobby"))
        .await
        .unwrap();
    let node = spawn_node(&core, rooms.clone(), &cancel);

    let (c1, mut rx1) = socket("tok1");
    node.clients.register(Arc::clone(&c1));
    node.clients.join_room(&c1, "lobby").await.unwrap();
    let (c2, mut rx2) = socket("tok2");
    node.clients.register(Arc::clone(&c2));
    node.clients.join_room(&c2, "lobby").await.unwrap();

    node.clients
        .on_message(&c1, r#"{"action":"chat","text":"hello there"}"#)
        .await;

    for rx in [&mut rx1, &mut rx2] {
        let chat = loop {
            let text = recv_text(rx).await;
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["action"] == "chat" {
                break value;
            }
        };
        assert_eq!(chat["text"], "hello there");
        assert_eq!(chat["from"]["name"], "guest");
    }

    cancel.cancel();
}

#[tokio::test]
async fn kickme_closes_with_unknown_code() {
    let core = MemoryBusCore::new();
    let cancel = CancellationToken::new();
    let rooms = rooms_on(&core);
    rooms
        .create_room(CreateRoomOptions::named("lobby"))
        .await
        .unwrap();
    let node = spawn_node(&core, rooms, &cancel);

    let (client, mut rx) = socket("tok");
    node.clients.register(Arc::clone(&client));
    node.clients.join_room(&client, "lobby").await.unwrap();

    node.clients
        .on_message(&client, r#"{"action":"kickme"}"#)
        .await;

    let close = loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("connection open");
        if let Frame::Close(code) = frame {
            break code;
        }
    };
    assert_eq!(close, CloseCode::Unknown);

    cancel.cancel();
}

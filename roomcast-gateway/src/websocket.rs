use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{Client, Frame};
use crate::manager::ClientManager;
use crate::session::SessionResolver;
use crate::wire::{parse_room_name, CloseCode};

#[derive(Clone)]
pub struct GatewayState {
    pub clients: Arc<ClientManager>,
    pub sessions: Arc<dyn SessionResolver>,
}

/// Routes for the client gateway. The connection URL is
/// `/api/room/{name}`; anything else that upgrades is closed with
/// `INVALID_CONNECTION_URL`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/room/:name", get(room_socket))
        .fallback(room_socket)
        .with_state(state)
}

async fn room_socket(
    State(state): State<GatewayState>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session = state.sessions.resolve(cookie.as_deref());

    ws.on_upgrade(move |socket| handle_socket(socket, state.clients, path, session))
}

async fn handle_socket(
    socket: WebSocket,
    manager: Arc<ClientManager>,
    path: String,
    session: roomcast_core::models::Session,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let client = Client::new(session, tx);

    // Writer task: drains the client's frame queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text),
                Frame::Ping => Message::Ping(Vec::new()),
                Frame::Pong(data) => Message::Pong(data),
                Frame::Close(code) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: code.code(),
                            reason: Cow::Borrowed(code.reason()),
                        })))
                        .await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let Some(name) = parse_room_name(&path) else {
        warn!(path = %path, "Rejecting socket with invalid connection url");
        client.send(Frame::Close(CloseCode::InvalidConnectionUrl));
        drop(client);
        let _ = writer.await;
        return;
    };

    manager.register(Arc::clone(&client));
    if let Err(e) = manager.join_room(&client, &name).await {
        warn!(room = %name, error = %e, "Socket join failed");
        client.send(Frame::Close(CloseCode::RoomNotFound));
        manager.on_close(&client).await;
        drop(client);
        let _ = writer.await;
        return;
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => manager.on_message(&client, &text).await,
            Ok(Message::Ping(data)) => {
                client.send(Frame::Pong(data));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client = %client.id, error = %e, "Socket read error");
                break;
            }
        }
    }

    manager.on_close(&client).await;
    drop(client);
    let _ = writer.await;
}

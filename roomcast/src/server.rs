use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use roomcast_cluster::RedisBus;
use roomcast_core::extractor::DirectUrlExtractor;
use roomcast_core::room::{RoomDirectory, RoomManager};
use roomcast_core::users::StaticUserStore;
use roomcast_core::Config;
use roomcast_gateway::{ClientManager, GatewayState, GuestSessions};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let (bus, bus_rx) = RedisBus::connect(&config.bus.url).await?;
    info!(url = %config.bus.url, "Connected to message bus");

    let extractor = Arc::new(DirectUrlExtractor::default());
    let users = Arc::new(StaticUserStore::new());

    let rooms = RoomManager::new(
        bus.clone(),
        extractor,
        users,
        config.room.clone(),
    );
    Arc::clone(&rooms).start(cancel.clone());

    let directory: Arc<dyn RoomDirectory> = rooms;
    let clients = ClientManager::new(bus.clone(), directory);
    Arc::clone(&clients).start(bus_rx, cancel.clone());
    Arc::clone(&clients).start_keepalive(
        Duration::from_secs(config.room.keepalive_interval_seconds),
        cancel.clone(),
    );

    let app = roomcast_gateway::router(GatewayState {
        clients,
        sessions: Arc::new(GuestSessions),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown_cancel.cancel();
        })
        .await?;

    bus.shutdown();
    Ok(())
}

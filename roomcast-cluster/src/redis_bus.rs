use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use roomcast_core::bus::{BusMessage, MessageBus};
use roomcast_core::{Error, Result};

/// Timeout for Redis operations
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial backoff delay for task reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for task reconnection
const MAX_BACKOFF_SECS: u64 = 30;

fn bus_err(e: redis::RedisError) -> Error {
    Error::Bus(e.to_string())
}

/// Redis-backed message bus.
///
/// Publishes are queued onto a bounded channel drained by a background
/// task that reconnects with exponential backoff and retries the in-flight
/// message after a reconnect. The subscriber task owns a split pub/sub
/// connection so new channel subscriptions can be added while the message
/// stream is live; on reconnect it re-subscribes every known channel.
/// Key/value operations go over a multiplexed connection.
pub struct RedisBus {
    kv: MultiplexedConnection,
    publish_tx: mpsc::Sender<BusMessage>,
    subscribe_tx: mpsc::UnboundedSender<String>,
    channels: Arc<DashSet<String>>,
    cancel: CancellationToken,
}

impl RedisBus {
    /// Messages queued beyond this are rejected (e.g. during a prolonged
    /// Redis outage) rather than growing without bound.
    pub const PUBLISH_QUEUE_CAPACITY: usize = 10_000;

    /// Connect and spawn the publisher/subscriber tasks. Returns the bus
    /// and the receiver subscribed messages arrive on.
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<BusMessage>)> {
        let client = RedisClient::open(url).map_err(bus_err)?;

        let kv = timeout(OP_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Bus("timed out connecting to redis".to_string()))?
            .map_err(bus_err)?;

        let (publish_tx, publish_rx) = mpsc::channel(Self::PUBLISH_QUEUE_CAPACITY);
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let channels = Arc::new(DashSet::new());
        let cancel = CancellationToken::new();

        tokio::spawn(run_publisher(client.clone(), publish_rx, cancel.clone()));
        tokio::spawn(run_subscriber(
            client,
            subscribe_rx,
            out_tx,
            Arc::clone(&channels),
            cancel.clone(),
        ));

        Ok((
            Arc::new(Self {
                kv,
                publish_tx,
                subscribe_tx,
                channels,
                cancel,
            }),
            out_rx,
        ))
    }

    /// Stop the publisher and subscriber tasks.
    pub fn shutdown(&self) {
        info!("Shutting down redis bus");
        self.cancel.cancel();
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.publish_tx
            .try_send(BusMessage {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Bus("publish queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Bus("publisher task stopped".to_string())
                }
            })
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        if self.channels.insert(channel.to_string()) {
            self.subscribe_tx
                .send(channel.to_string())
                .map_err(|_| Error::Bus("subscriber task stopped".to_string()))?;
        }
        Ok(())
    }

    async fn set_key(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.kv.clone();
        let result: redis::RedisResult<()> = timeout(OP_TIMEOUT, conn.set(key, value))
            .await
            .map_err(|_| Error::Bus(format!("timed out writing key {key}")))?;
        result.map_err(bus_err)
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.kv.clone();
        let result: redis::RedisResult<Option<String>> =
            timeout(OP_TIMEOUT, conn.get(key))
                .await
                .map_err(|_| Error::Bus(format!("timed out reading key {key}")))?;
        result.map_err(bus_err)
    }
}

async fn publish_one(conn: &mut MultiplexedConnection, msg: &BusMessage) -> Result<()> {
    let result: redis::RedisResult<usize> =
        timeout(OP_TIMEOUT, conn.publish(&msg.channel, &msg.payload))
            .await
            .map_err(|_| Error::Bus("timed out publishing".to_string()))?;
    let subscribers = result.map_err(bus_err)?;
    debug!(channel = %msg.channel, subscribers, "Published to redis");
    Ok(())
}

async fn run_publisher(
    client: RedisClient,
    mut rx: mpsc::Receiver<BusMessage>,
    cancel: CancellationToken,
) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    // Held over a reconnect so a message that hit a broken connection is
    // not lost.
    let mut retry: Option<BusMessage> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut conn = match timeout(OP_TIMEOUT, client.get_multiplexed_async_connection()).await
        {
            Ok(Ok(conn)) => {
                backoff_secs = INITIAL_BACKOFF_SECS;
                conn
            }
            Ok(Err(e)) => {
                error!(error = %e, backoff_secs, "Bus publisher failed to connect, retrying");
                if wait_backoff(&cancel, &mut backoff_secs).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                error!(backoff_secs, "Bus publisher timed out connecting, retrying");
                if wait_backoff(&cancel, &mut backoff_secs).await {
                    return;
                }
                continue;
            }
        };

        info!("Bus publisher (re)connected");

        if let Some(msg) = retry.take() {
            if let Err(e) = publish_one(&mut conn, &msg).await {
                warn!(error = %e, channel = %msg.channel, "Retry publish failed");
                retry = Some(msg);
                if wait_backoff(&cancel, &mut backoff_secs).await {
                    return;
                }
                continue;
            }
        }

        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return,
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else {
                debug!("Publish queue closed, bus publisher exiting");
                return;
            };
            if let Err(e) = publish_one(&mut conn, &msg).await {
                error!(
                    error = %e,
                    channel = %msg.channel,
                    "Publish failed, saving message for retry after reconnect"
                );
                retry = Some(msg);
                break;
            }
        }

        if wait_backoff(&cancel, &mut backoff_secs).await {
            return;
        }
    }
}

async fn run_subscriber(
    client: RedisClient,
    mut subscribe_rx: mpsc::UnboundedReceiver<String>,
    out_tx: mpsc::UnboundedSender<BusMessage>,
    channels: Arc<DashSet<String>>,
    cancel: CancellationToken,
) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match timeout(OP_TIMEOUT, client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => {
                let (mut sink, mut stream) = pubsub.split();

                // Re-subscribe everything known from before the reconnect
                let known: Vec<String> = channels.iter().map(|c| c.key().clone()).collect();
                let mut healthy = true;
                for channel in known {
                    if let Err(e) = sink.subscribe(&channel).await {
                        error!(error = %e, channel, "Failed to re-subscribe after reconnect");
                        healthy = false;
                        break;
                    }
                }

                if healthy {
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    info!("Bus subscriber connected");

                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            cmd = subscribe_rx.recv() => match cmd {
                                Some(channel) => {
                                    if let Err(e) = sink.subscribe(&channel).await {
                                        error!(error = %e, channel, "Subscribe failed, reconnecting");
                                        break;
                                    }
                                    debug!(channel, "Subscribed to bus channel");
                                }
                                None => {
                                    debug!("Subscribe queue closed, bus subscriber exiting");
                                    return;
                                }
                            },
                            msg = stream.next() => match msg {
                                Some(msg) => {
                                    let channel = msg.get_channel_name().to_string();
                                    match msg.get_payload::<String>() {
                                        Ok(payload) => {
                                            let _ = out_tx.send(BusMessage { channel, payload });
                                        }
                                        Err(e) => {
                                            warn!(error = %e, channel = %channel, "Invalid bus payload");
                                        }
                                    }
                                }
                                None => {
                                    error!("Bus subscriber stream ended, reconnecting");
                                    break;
                                }
                            },
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, backoff_secs, "Bus subscriber failed to connect");
            }
            Err(_) => {
                error!(backoff_secs, "Bus subscriber timed out connecting");
            }
        }

        if wait_backoff(&cancel, &mut backoff_secs).await {
            return;
        }
    }
}

/// Sleep out the backoff, doubling it for next time. Returns true when
/// cancelled.
async fn wait_backoff(cancel: &CancellationToken, backoff_secs: &mut u64) -> bool {
    let cancelled = tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(Duration::from_secs(*backoff_secs)) => false,
    };
    *backoff_secs = (*backoff_secs * 2).min(MAX_BACKOFF_SECS);
    cancelled
}

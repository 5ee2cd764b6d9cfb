use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::debug;

use roomcast_core::bus::{BusMessage, MessageBus};
use roomcast_core::Result;

struct NodeHandle {
    tx: mpsc::UnboundedSender<BusMessage>,
    channels: DashSet<String>,
}

/// Shared substrate for in-process buses. Each `attach()` produces one
/// "node": a bus handle plus the receiver its subscribed messages arrive
/// on. Two attached nodes behave like two processes sharing a real bus —
/// a publisher that is subscribed to its own channel hears itself, exactly
/// like pub/sub.
#[derive(Default)]
pub struct MemoryBusCore {
    kv: DashMap<String, String>,
    nodes: DashMap<usize, NodeHandle>,
    next_node: AtomicUsize,
}

impl MemoryBusCore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node, returning its bus handle and message receiver.
    pub fn attach(core: &Arc<Self>) -> (Arc<MemoryBus>, mpsc::UnboundedReceiver<BusMessage>) {
        let node_id = core.next_node.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        core.nodes.insert(
            node_id,
            NodeHandle {
                tx,
                channels: DashSet::new(),
            },
        );
        let bus = Arc::new(MemoryBus {
            core: Arc::clone(core),
            node_id,
        });
        (bus, rx)
    }
}

/// One node's handle onto a `MemoryBusCore`
pub struct MemoryBus {
    core: Arc<MemoryBusCore>,
    node_id: usize,
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        self.core.nodes.remove(&self.node_id);
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut delivered = 0;
        for node in self.core.nodes.iter() {
            if node.channels.contains(channel) {
                if node
                    .tx
                    .send(BusMessage {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok()
                {
                    delivered += 1;
                }
            }
        }
        debug!(channel, delivered, "memory bus publish");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        if let Some(node) = self.core.nodes.get(&self.node_id) {
            node.channels.insert(channel.to_string());
        }
        Ok(())
    }

    async fn set_key(&self, key: &str, value: String) -> Result<()> {
        self.core.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>> {
        Ok(self.core.kv.get(key).map(|v| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribed_nodes_only() {
        let core = MemoryBusCore::new();
        let (bus1, mut rx1) = MemoryBusCore::attach(&core);
        let (bus2, mut rx2) = MemoryBusCore::attach(&core);

        bus1.subscribe("room:lobby").await.unwrap();
        bus2.subscribe("room:lobby").await.unwrap();

        bus1.publish("room:lobby", "hello".to_string()).await.unwrap();

        // Both nodes receive, including the publisher itself
        assert_eq!(rx1.recv().await.unwrap().payload, "hello");
        assert_eq!(rx2.recv().await.unwrap().payload, "hello");

        bus1.publish("room:other", "quiet".to_string()).await.unwrap();
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_kv_shared_across_nodes() {
        let core = MemoryBusCore::new();
        let (bus1, _rx1) = MemoryBusCore::attach(&core);
        let (bus2, _rx2) = MemoryBusCore::attach(&core);

        bus1.set_key("room-sync:lobby", "{}".to_string())
            .await
            .unwrap();
        assert_eq!(
            bus2.get_key("room-sync:lobby").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(bus2.get_key("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_detached_node_stops_receiving() {
        let core = MemoryBusCore::new();
        let (bus1, _rx1) = MemoryBusCore::attach(&core);
        let (bus2, mut rx2) = MemoryBusCore::attach(&core);
        bus2.subscribe("room:lobby").await.unwrap();

        drop(bus2);
        bus1.publish("room:lobby", "gone".to_string()).await.unwrap();
        assert!(rx2.try_recv().is_err());
    }
}

//! Shared fakes for room engine tests: a bus that records everything it is
//! asked to publish, and an extractor backed by a fixed catalog.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::bus::{BusMessage, MessageBus};
use crate::extractor::InfoExtractor;
use crate::models::{Video, VideoRef};
use crate::{Error, Result};

/// In-memory bus that records published messages and stored keys.
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<BusMessage>>,
    kv: DashMap<String, String>,
    subscriptions: DashMap<String, ()>,
}

impl RecordingBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().expect("bus lock").clone()
    }

    /// Payloads published to one channel, in order
    #[must_use]
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload)
            .collect()
    }

    /// The `action` field of every payload published to one channel
    #[must_use]
    pub fn actions_on(&self, channel: &str) -> Vec<String> {
        self.published_on(channel)
            .iter()
            .filter_map(|p| {
                serde_json::from_str::<serde_json::Value>(p)
                    .ok()?
                    .get("action")?
                    .as_str()
                    .map(str::to_string)
            })
            .collect()
    }

    #[must_use]
    pub fn key(&self, key: &str) -> Option<String> {
        self.kv.get(key).map(|v| v.clone())
    }

    pub fn seed_key(&self, key: &str, value: &str) {
        self.kv.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains_key(channel)
    }

    pub fn clear_published(&self) {
        self.published.lock().expect("bus lock").clear();
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.published.lock().expect("bus lock").push(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.subscriptions.insert(channel.to_string(), ());
        Ok(())
    }

    async fn set_key(&self, key: &str, value: String) -> Result<()> {
        self.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>> {
        Ok(self.kv.get(key).map(|v| v.clone()))
    }
}

/// Extractor backed by a fixed catalog. URLs of the form
/// `https://vid.example/{service}/{id}` resolve to refs.
#[derive(Debug, Default)]
pub struct StubExtractor {
    catalog: DashMap<VideoRef, Video>,
}

impl StubExtractor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn with_videos(videos: impl IntoIterator<Item = Video>) -> Arc<Self> {
        let stub = Self::default();
        for v in videos {
            stub.insert(v);
        }
        Arc::new(stub)
    }

    pub fn insert(&self, video: Video) {
        self.catalog.insert(VideoRef::from(&video), video);
    }
}

#[async_trait]
impl InfoExtractor for StubExtractor {
    async fn resolve_url(&self, url: &str) -> Result<VideoRef> {
        let rest = url
            .strip_prefix("https://vid.example/")
            .ok_or_else(|| Error::Extractor(format!("unknown url: {url}")))?;
        let (service, id) = rest
            .split_once('/')
            .ok_or_else(|| Error::Extractor(format!("unknown url: {url}")))?;
        Ok(VideoRef::new(service, id))
    }

    async fn fetch_video(&self, video: &VideoRef) -> Result<Video> {
        self.catalog
            .get(video)
            .map(|v| v.clone())
            .ok_or_else(|| Error::Extractor(format!("no metadata for {}", video.key())))
    }
}

/// Catalog video with predictable metadata
#[must_use]
pub fn test_video(service: &str, id: &str, length: f64) -> Video {
    Video {
        service: service.to_string(),
        id: id.to_string(),
        title: format!("{id} title"),
        length,
        thumbnail: None,
    }
}

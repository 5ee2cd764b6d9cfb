use async_trait::async_trait;

use crate::models::{Video, VideoRef};
use crate::{Error, Result};

/// Video metadata extraction collaborator. The real extractor (service
/// detection, API calls, duration probing) is out of scope; the room
/// engine only needs URL resolution and metadata fetch.
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Resolve a URL to its (service, id) pair.
    async fn resolve_url(&self, url: &str) -> Result<VideoRef>;

    /// Fetch full metadata for one video.
    async fn fetch_video(&self, video: &VideoRef) -> Result<Video>;

    /// Fetch metadata for a batch, preserving input order. A single
    /// failure aborts the whole batch.
    async fn fetch_videos(&self, videos: &[VideoRef]) -> Result<Vec<Video>> {
        let mut out = Vec::with_capacity(videos.len());
        for v in videos {
            out.push(self.fetch_video(v).await?);
        }
        Ok(out)
    }
}

/// Pass-through extractor for direct media URLs: the URL itself is the
/// video ID under the "direct" pseudo-service. Without probing, the
/// duration is unknown; a long upper bound keeps the periodic update from
/// dequeueing mid-play.
#[derive(Debug, Clone)]
pub struct DirectUrlExtractor {
    pub assumed_length: f64,
}

impl DirectUrlExtractor {
    pub const DEFAULT_ASSUMED_LENGTH: f64 = 4.0 * 3600.0;
}

impl Default for DirectUrlExtractor {
    fn default() -> Self {
        Self {
            assumed_length: Self::DEFAULT_ASSUMED_LENGTH,
        }
    }
}

#[async_trait]
impl InfoExtractor for DirectUrlExtractor {
    async fn resolve_url(&self, url: &str) -> Result<VideoRef> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Extractor(format!("not a direct media url: {url}")));
        }
        Ok(VideoRef::new("direct", url))
    }

    async fn fetch_video(&self, video: &VideoRef) -> Result<Video> {
        if video.service != "direct" {
            return Err(Error::Extractor(format!(
                "unsupported service: {}",
                video.service
            )));
        }
        let title = video
            .id
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(video.id.as_str())
            .to_string();
        Ok(Video {
            service: video.service.clone(),
            id: video.id.clone(),
            title,
            length: self.assumed_length,
            thumbnail: None,
        })
    }
}

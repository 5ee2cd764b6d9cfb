use serde::{Deserialize, Serialize};

/// A queueable video, fully resolved through the info extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    /// Source service (e.g. "youtube", "direct")
    pub service: String,
    /// Service-scoped video ID
    pub id: String,
    pub title: String,
    /// Duration in seconds
    pub length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl Video {
    /// Vote-map key: `service || id`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{}", self.service, self.id)
    }

    /// Two videos refer to the same source iff their (service, id) pairs match
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        self.service == other.service && self.id == other.id
    }

    #[must_use]
    pub fn matches(&self, r: &VideoRef) -> bool {
        self.service == r.service && self.id == r.id
    }
}

/// The lookup-key form of a video: enough to identify it, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRef {
    pub service: String,
    pub id: String,
}

impl VideoRef {
    #[must_use]
    pub fn new(service: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{}", self.service, self.id)
    }
}

impl From<&Video> for VideoRef {
    fn from(v: &Video) -> Self {
        Self {
            service: v.service.clone(),
            id: v.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_key_concatenation() {
        let v = Video {
            service: "youtube".to_string(),
            id: "abc123".to_string(),
            title: "test".to_string(),
            length: 100.0,
            thumbnail: None,
        };
        assert_eq!(v.key(), "youtubeabc123");
        assert_eq!(VideoRef::from(&v).key(), "youtubeabc123");
    }

    #[test]
    fn test_matches_by_service_and_id() {
        let v = Video {
            service: "youtube".to_string(),
            id: "abc".to_string(),
            title: "a title".to_string(),
            length: 10.0,
            thumbnail: None,
        };
        assert!(v.matches(&VideoRef::new("youtube", "abc")));
        assert!(!v.matches(&VideoRef::new("vimeo", "abc")));
        assert!(!v.matches(&VideoRef::new("youtube", "abd")));
    }
}

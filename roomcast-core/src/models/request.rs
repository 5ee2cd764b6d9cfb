use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::grants::{Permission, Role};
use super::id::ClientId;
use super::room_user::{ClientInfo, UserSummary};
use super::video::{Video, VideoRef};
use crate::room::state::{QueueMode, Visibility};

/// A request applied to a room's authoritative state. One tagged variant
/// per operation; the dispatcher is a match over the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomRequest {
    /// Play (`state: true`) or pause (`state: false`)
    Playback { state: bool },
    Skip,
    #[serde(rename_all = "camelCase")]
    Seek {
        #[serde(default)]
        value: Option<f64>,
    },
    /// Accepts a url (resolved via the extractor), a single video ref, or a
    /// batch of refs.
    #[serde(rename_all = "camelCase")]
    Add {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video: Option<VideoRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        videos: Option<Vec<VideoRef>>,
    },
    Remove {
        video: VideoRef,
    },
    #[serde(rename_all = "camelCase")]
    Order { from_idx: usize, to_idx: usize },
    #[serde(rename_all = "camelCase")]
    Vote { video: VideoRef, add: bool },
    Join {
        info: ClientInfo,
    },
    Leave,
    UpdateUser {
        info: ClientInfo,
    },
    Chat {
        text: String,
    },
    /// Inverts a previously published event. The server keeps no history;
    /// clients echo the event payload back.
    Undo {
        event: Box<RoomEvent>,
    },
    #[serde(rename_all = "camelCase")]
    Promote {
        target_client_id: ClientId,
        role: Role,
    },
    /// Room settings update; each present field is gated by its own
    /// configure-room permission.
    #[serde(rename_all = "camelCase")]
    Settings {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visibility: Option<Visibility>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_mode: Option<QueueMode>,
    },
}

impl RoomRequest {
    /// The generic permission gating this request type, if any. Join,
    /// leave, identity updates, undo and promotion carry no generic
    /// permission (promotion performs its own checks).
    #[must_use]
    pub const fn required_permission(&self) -> Option<Permission> {
        match self {
            Self::Playback { .. } => Some(Permission::PlayPause),
            Self::Skip => Some(Permission::Skip),
            Self::Seek { .. } => Some(Permission::Seek),
            Self::Add { .. } => Some(Permission::AddToQueue),
            Self::Remove { .. } => Some(Permission::RemoveFromQueue),
            Self::Order { .. } => Some(Permission::OrderQueue),
            Self::Vote { .. } => Some(Permission::Vote),
            Self::Chat { .. } => Some(Permission::Chat),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Playback { .. } => "playback",
            Self::Skip => "skip",
            Self::Seek { .. } => "seek",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Order { .. } => "order",
            Self::Vote { .. } => "vote",
            Self::Join { .. } => "join",
            Self::Leave => "leave",
            Self::UpdateUser { .. } => "updateUser",
            Self::Chat { .. } => "chat",
            Self::Undo { .. } => "undo",
            Self::Promote { .. } => "promote",
            Self::Settings { .. } => "settings",
        }
    }
}

/// Extra payload attached to a published event; carries what undo needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<Video>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_idx: Option<usize>,
}

/// Record of a completed state-changing request, published on the room
/// channel for UI notification and undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub request: RoomRequest,
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<EventContext>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_tag() {
        let req = RoomRequest::Seek { value: Some(42.0) };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"seek\""));

        let back: RoomRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_permission_map() {
        assert_eq!(
            RoomRequest::Playback { state: true }.required_permission(),
            Some(Permission::PlayPause)
        );
        assert_eq!(RoomRequest::Skip.required_permission(), Some(Permission::Skip));
        assert_eq!(RoomRequest::Leave.required_permission(), None);
        assert_eq!(
            RoomRequest::Promote {
                target_client_id: ClientId::new(),
                role: Role::Moderator,
            }
            .required_permission(),
            None
        );
    }

    #[test]
    fn test_event_roundtrip_preserves_additional() {
        let event = RoomEvent {
            request: RoomRequest::Skip,
            user: UserSummary {
                id: ClientId::new(),
                name: "alice".to_string(),
                is_logged_in: true,
                status: crate::models::room_user::PlayerStatus::Ready,
                role: Role::RegisteredUser,
            },
            additional: Some(EventContext {
                video: Some(Video {
                    service: "youtube".to_string(),
                    id: "abc".to_string(),
                    title: "t".to_string(),
                    length: 100.0,
                    thumbnail: None,
                }),
                prev_position: Some(30.0),
                ..EventContext::default()
            }),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: RoomEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request, RoomRequest::Skip);
        let additional = back.additional.unwrap();
        assert_eq!(additional.prev_position, Some(30.0));
        assert_eq!(additional.video.unwrap().id, "abc");
    }
}

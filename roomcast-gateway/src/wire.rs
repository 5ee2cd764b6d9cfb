use serde::Deserialize;

use roomcast_core::models::{ClientId, PlayerStatus, Role, RoomEvent};

/// Close codes surfaced to clients when the gateway drops a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Unknown,
    InvalidConnectionUrl,
    RoomNotFound,
    RoomUnloaded,
}

impl CloseCode {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Unknown => 4000,
            Self::InvalidConnectionUrl => 4001,
            Self::RoomNotFound => 4002,
            Self::RoomUnloaded => 4003,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::InvalidConnectionUrl => "invalid connection url",
            Self::RoomNotFound => "room not found",
            Self::RoomUnloaded => "room unloaded",
        }
    }
}

/// Client→server frames, JSON text with an `action` tag. Unknown actions
/// deserialize to `Unknown` and are logged and dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ClientFrame {
    Play,
    Pause,
    Skip,
    Seek {
        #[serde(default)]
        value: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    QueueMove { from_idx: usize, to_idx: usize },
    Chat {
        text: String,
    },
    Status {
        status: PlayerStatus,
    },
    #[serde(rename_all = "camelCase")]
    SetRole { client_id: ClientId, role: Role },
    /// Echo of a previously received event, inverted by the room
    Undo {
        event: RoomEvent,
    },
    Kickme,
    #[serde(other)]
    Unknown,
}

/// Extract the room name from a connection URL path. Only
/// `/api/room/{name}` is a valid connection URL.
#[must_use]
pub fn parse_room_name(path: &str) -> Option<String> {
    let name = path.strip_prefix("/api/room/")?;
    let name = name.split(['?', '#']).next().unwrap_or(name);
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_name() {
        assert_eq!(parse_room_name("/api/room/lobby"), Some("lobby".to_string()));
        assert_eq!(
            parse_room_name("/api/room/movie-night"),
            Some("movie-night".to_string())
        );
        assert_eq!(parse_room_name("/api/room/"), None);
        assert_eq!(parse_room_name("/api/room/a/b"), None);
        assert_eq!(parse_room_name("/ws/room/lobby"), None);
        assert_eq!(parse_room_name("/"), None);
    }

    #[test]
    fn test_client_frame_actions() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"play"}"#).unwrap(),
            ClientFrame::Play
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"pause"}"#).unwrap(),
            ClientFrame::Pause
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"seek","value":12.5}"#).unwrap(),
            ClientFrame::Seek { value: Some(v) } if (v - 12.5).abs() < f64::EPSILON
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(
                r#"{"action":"queue-move","fromIdx":2,"toIdx":0}"#
            )
            .unwrap(),
            ClientFrame::QueueMove {
                from_idx: 2,
                to_idx: 0
            }
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"status","status":"ready"}"#)
                .unwrap(),
            ClientFrame::Status {
                status: PlayerStatus::Ready
            }
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"kickme"}"#).unwrap(),
            ClientFrame::Kickme
        ));
    }

    #[test]
    fn test_unrecognized_action_is_unknown() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"action":"dance"}"#).unwrap(),
            ClientFrame::Unknown
        ));
    }

    #[test]
    fn test_set_role_frame() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"action":"set-role","clientId":"client000001","role":"moderator"}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::SetRole { client_id, role } => {
                assert_eq!(client_id.as_str(), "client000001");
                assert_eq!(role, Role::Moderator);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseCode::Unknown.code(), 4000);
        assert_eq!(CloseCode::InvalidConnectionUrl.code(), 4001);
        assert_eq!(CloseCode::RoomNotFound.code(), 4002);
        assert_eq!(CloseCode::RoomUnloaded.code(), 4003);
    }
}

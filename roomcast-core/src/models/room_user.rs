use serde::{Deserialize, Serialize};
use tracing::warn;

use super::grants::Role;
use super::id::{ClientId, UserId};
use super::user::User;
use crate::users::UserStore;

/// Reported player state of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    None,
    Ready,
    Buffering,
    Error,
}

/// Identity payload carried by join/update requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlayerStatus>,
}

impl ClientInfo {
    #[must_use]
    pub const fn new(id: ClientId) -> Self {
        Self {
            id,
            user_id: None,
            username: None,
            status: None,
        }
    }
}

/// Per-participant view inside a room. Created on join, destroyed on leave;
/// exclusively owned by the room.
#[derive(Debug, Clone)]
pub struct RoomUser {
    pub id: ClientId,
    pub user_id: Option<UserId>,
    pub unregistered_username: String,
    pub player_status: PlayerStatus,
    pub cached_user: Option<User>,
}

impl RoomUser {
    #[must_use]
    pub const fn new(id: ClientId) -> Self {
        Self {
            id,
            user_id: None,
            unregistered_username: String::new(),
            player_status: PlayerStatus::None,
            cached_user: None,
        }
    }

    /// Apply an identity update. A registered identity wins over an
    /// unregistered one; a failed account lookup leaves the cached user
    /// empty rather than failing the request.
    pub async fn update_info(&mut self, info: &ClientInfo, users: &dyn UserStore) {
        if let Some(user_id) = &info.user_id {
            self.user_id = Some(user_id.clone());
            match users.get_user(user_id).await {
                Ok(user) => self.cached_user = Some(user),
                Err(e) => {
                    warn!(
                        client_id = %self.id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to fetch user for room participant"
                    );
                    self.cached_user = None;
                }
            }
            self.unregistered_username.clear();
        } else if let Some(username) = &info.username {
            self.unregistered_username = username.clone();
            self.user_id = None;
            self.cached_user = None;
        }

        if let Some(status) = info.status {
            self.player_status = status;
        }
    }

    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        if self.is_logged_in() {
            self.cached_user
                .as_ref()
                .map_or("", |u| u.username.as_str())
        } else {
            &self.unregistered_username
        }
    }
}

/// Participant view published in sync messages and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: ClientId,
    pub name: String,
    pub is_logged_in: bool,
    pub status: PlayerStatus,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::StaticUserStore;

    #[tokio::test]
    async fn test_update_info_registered_wins() {
        let users = StaticUserStore::default();
        let uid = UserId::from_string("user00000001".to_string());
        users.insert(User::new(uid.clone(), "alice"));

        let mut ru = RoomUser::new(ClientId::new());
        let mut info = ClientInfo::new(ru.id.clone());
        info.username = Some("guest".to_string());
        ru.update_info(&info, &users).await;
        assert!(!ru.is_logged_in());
        assert_eq!(ru.username(), "guest");

        let mut info = ClientInfo::new(ru.id.clone());
        info.user_id = Some(uid);
        ru.update_info(&info, &users).await;
        assert!(ru.is_logged_in());
        assert_eq!(ru.username(), "alice");
        assert!(ru.unregistered_username.is_empty());
    }

    #[tokio::test]
    async fn test_update_info_unregistered_clears_account() {
        let users = StaticUserStore::default();
        let uid = UserId::from_string("user00000002".to_string());
        users.insert(User::new(uid.clone(), "bob"));

        let mut ru = RoomUser::new(ClientId::new());
        let mut info = ClientInfo::new(ru.id.clone());
        info.user_id = Some(uid);
        ru.update_info(&info, &users).await;
        assert!(ru.is_logged_in());

        let mut info = ClientInfo::new(ru.id.clone());
        info.username = Some("bob-incognito".to_string());
        ru.update_info(&info, &users).await;
        assert!(!ru.is_logged_in());
        assert_eq!(ru.username(), "bob-incognito");
        assert!(ru.cached_user.is_none());
    }

    #[tokio::test]
    async fn test_update_info_status_overwrite() {
        let users = StaticUserStore::default();
        let mut ru = RoomUser::new(ClientId::new());

        let mut info = ClientInfo::new(ru.id.clone());
        info.status = Some(PlayerStatus::Buffering);
        ru.update_info(&info, &users).await;
        assert_eq!(ru.player_status, PlayerStatus::Buffering);

        // No status in the update leaves the old one in place
        let info = ClientInfo::new(ru.id.clone());
        ru.update_info(&info, &users).await;
        assert_eq!(ru.player_status, PlayerStatus::Buffering);
    }
}

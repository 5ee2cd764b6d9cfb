use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::{User, UserId};
use crate::{Error, Result};

/// Account lookup collaborator. Account storage is out of scope for the
/// coordination core; rooms only need to resolve a `UserId` to a display
/// identity when a registered participant joins or changes.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &UserId) -> Result<User>;
}

/// In-memory user store. Used by the binary until a real account system is
/// wired in, and by tests.
#[derive(Debug, Default)]
pub struct StaticUserStore {
    users: DashMap<UserId, User>,
}

impl StaticUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserStore for StaticUserStore {
    async fn get_user(&self, id: &UserId) -> Result<User> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| Error::UserLookup(format!("unknown user {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_store_lookup() {
        let store = StaticUserStore::new();
        let uid = UserId::from_string("user00000001".to_string());
        store.insert(User::new(uid.clone(), "alice"));

        let user = store.get_user(&uid).await.unwrap();
        assert_eq!(user.username, "alice");

        let missing = UserId::from_string("user00000002".to_string());
        assert!(store.get_user(&missing).await.is_err());
    }
}

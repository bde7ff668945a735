//! 用户存储：外部协作方，只提供按 id/外部身份/邮箱查询与身份绑定。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

/// 本地用户记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRecord {
    pub(crate) id: i64,
    pub(crate) username: String,
    pub(crate) email: Option<String>,
    pub(crate) avatar_url: Option<String>,
    /// 已绑定的外部身份 id。
    pub(crate) provider_id: Option<String>,
}

/// 身份提供方返回的外部身份。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExternalIdentity {
    pub(crate) provider_id: String,
    pub(crate) display_name: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum UserStoreError {
    #[error("user not found")]
    NotFound,
    /// 外部身份已绑定到其他用户，或该用户已绑定其他外部身份。
    #[error("external identity already linked to user {owner}")]
    AlreadyLinked { owner: i64 },
    #[error("user store failure: {0}")]
    Backend(String),
}

#[async_trait]
pub(crate) trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, UserStoreError>;
    async fn find_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<UserRecord>, UserStoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, UserStoreError>;
    /// 绑定外部身份；重复绑定同一身份是幂等的。
    async fn link_provider(
        &self,
        user_id: i64,
        identity: &ExternalIdentity,
    ) -> Result<(), UserStoreError>;
}

/// 进程内用户存储，用于本地运行与测试。
#[derive(Default)]
pub(crate) struct MemoryUserStore {
    users: RwLock<HashMap<i64, UserRecord>>,
}

impl MemoryUserStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, user: UserRecord) {
        self.users.write().await.insert(user.id, user);
    }

    pub(crate) async fn remove(&self, user_id: i64) {
        self.users.write().await.remove(&user_id);
    }

    pub(crate) async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, UserStoreError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<UserRecord>, UserStoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, UserStoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| {
                user.email
                    .as_deref()
                    .is_some_and(|own| own.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn link_provider(
        &self,
        user_id: i64,
        identity: &ExternalIdentity,
    ) -> Result<(), UserStoreError> {
        let mut users = self.users.write().await;
        if let Some(owner) = users
            .values()
            .find(|user| user.provider_id.as_deref() == Some(identity.provider_id.as_str()))
            && owner.id != user_id
        {
            return Err(UserStoreError::AlreadyLinked { owner: owner.id });
        }
        let user = users.get_mut(&user_id).ok_or(UserStoreError::NotFound)?;
        match user.provider_id.as_deref() {
            Some(existing) if existing != identity.provider_id => {
                Err(UserStoreError::AlreadyLinked { owner: user_id })
            }
            _ => {
                user.provider_id = Some(identity.provider_id.clone());
                if user.avatar_url.is_none() {
                    user.avatar_url = identity.avatar_url.clone();
                }
                Ok(())
            }
        }
    }
}

/// 解析 `id:username[:email]` 逗号分隔的种子用户列表；非法条目被跳过。
pub(crate) fn parse_seed_users(raw: &str) -> Vec<UserRecord> {
    raw.split(',')
        .filter_map(|item| {
            let mut parts = item.trim().splitn(3, ':');
            let id = parts.next()?.trim().parse::<i64>().ok()?;
            let username = parts.next()?.trim();
            if username.is_empty() {
                return None;
            }
            let email = parts
                .next()
                .map(str::trim)
                .filter(|email| !email.is_empty())
                .map(str::to_string);
            Some(UserRecord {
                id,
                username: username.to_string(),
                email,
                avatar_url: None,
                provider_id: None,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_user(id: i64, email: &str) -> UserRecord {
    UserRecord {
        id,
        username: format!("user{id}"),
        email: Some(email.to_string()),
        avatar_url: None,
        provider_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ExternalIdentity, MemoryUserStore, UserStore, UserStoreError, parse_seed_users, test_user,
    };

    fn identity(id: &str) -> ExternalIdentity {
        ExternalIdentity {
            provider_id: id.to_string(),
            display_name: "Ext".to_string(),
            avatar_url: Some("https://img/a.png".to_string()),
            email: None,
        }
    }

    #[tokio::test]
    async fn link_is_idempotent_and_exclusive() {
        let store = MemoryUserStore::new();
        store.insert(test_user(1, "a@x.io")).await;
        store.insert(test_user(2, "b@x.io")).await;

        store.link_provider(1, &identity("ext-1")).await.expect("link");
        store
            .link_provider(1, &identity("ext-1"))
            .await
            .expect("relink same identity");
        assert!(matches!(
            store.link_provider(2, &identity("ext-1")).await,
            Err(UserStoreError::AlreadyLinked { owner: 1 })
        ));
        assert!(matches!(
            store.link_provider(1, &identity("ext-2")).await,
            Err(UserStoreError::AlreadyLinked { owner: 1 })
        ));

        let linked = store
            .find_by_provider_id("ext-1")
            .await
            .expect("query")
            .expect("linked user");
        assert_eq!(linked.id, 1);
        assert_eq!(linked.avatar_url.as_deref(), Some("https://img/a.png"));
    }

    #[tokio::test]
    async fn email_lookup_ignores_ascii_case() {
        let store = MemoryUserStore::new();
        store.insert(test_user(5, "Mixed@Example.com")).await;
        let found = store
            .find_by_email("mixed@example.com")
            .await
            .expect("query");
        assert_eq!(found.map(|u| u.id), Some(5));
    }

    #[test]
    fn seed_users_skip_malformed_items() {
        let users = parse_seed_users("1:alice:alice@x.io, 2:bob ,x:bad, 3:");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email.as_deref(), Some("alice@x.io"));
        assert_eq!(users[1].username, "bob");
        assert_eq!(users[1].email, None);
    }
}

//! OAuth 登录/绑定：CSRF state 与待确认绑定两个会合存储实例。
//!
//! state 在回调时原子消费，同一授权码回调重放只会有一次生效；
//! 邮箱匹配到未绑定账号时不直接绑定，而是签发绑定令牌等待用户确认。

mod http;
mod link;
pub(crate) mod provider;
mod state;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) use http::{
    confirm_link_handler, oauth_begin_handler, oauth_callback_handler, pending_link_handler,
};
pub(crate) use link::{LinkError, PendingLink};
pub(crate) use state::OAuthState;

use crate::{
    auth::{AuthFailure, AuthenticateError, authenticate, session::SessionIssuer},
    rendezvous::{RendezvousStore, StoreError},
    users::{UserStore, UserStoreError},
};
use provider::{AuthorizeEndpoint, IdentityError, IdentityProvider};

/// CSRF state 句柄字节数。
pub(crate) const STATE_HANDLE_BYTES: usize = 16;
/// 绑定令牌句柄字节数。
pub(crate) const LINK_HANDLE_BYTES: usize = 24;

/// 发起 OAuth 的目的。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OAuthAction {
    Login,
    Link,
}

impl OAuthAction {
    /// 空值视为登录。
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" | "login" => Some(Self::Login),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum OAuthError {
    #[error("oauth is not configured")]
    NotConfigured,
    #[error("unknown oauth action")]
    InvalidAction,
    #[error("session rejected: {0:?}")]
    Unauthorized(AuthFailure),
    /// state 缺失、未知、过期或已被使用。
    #[error("oauth state is invalid")]
    StateInvalid,
    #[error("user denied authorization: {0}")]
    Denied(String),
    #[error(transparent)]
    Provider(#[from] IdentityError),
    /// 外部身份已绑定到其他用户。
    #[error("external identity already linked")]
    AlreadyLinked,
    #[error("no local account is linked to this identity")]
    NoLinkedAccount,
    #[error("user not found")]
    UserNotFound,
    #[error("session mint failed: {0}")]
    SessionMint(String),
    #[error("oauth internal failure: {0}")]
    Internal(String),
}

/// OAuth 服务。
pub(crate) struct OAuthService {
    states: Arc<dyn RendezvousStore<OAuthState>>,
    links: Arc<dyn RendezvousStore<PendingLink>>,
    provider: Option<Arc<dyn IdentityProvider>>,
    authorize: Option<AuthorizeEndpoint>,
    sessions: Arc<dyn SessionIssuer>,
    users: Arc<dyn UserStore>,
    ttl_ms: u64,
}

impl OAuthService {
    pub(crate) fn new(
        states: Arc<dyn RendezvousStore<OAuthState>>,
        links: Arc<dyn RendezvousStore<PendingLink>>,
        sessions: Arc<dyn SessionIssuer>,
        users: Arc<dyn UserStore>,
        ttl_ms: u64,
    ) -> Self {
        Self {
            states,
            links,
            provider: None,
            authorize: None,
            sessions,
            users,
            ttl_ms,
        }
    }

    /// 挂载身份提供方；未挂载时发起/回调返回 `NotConfigured`。
    pub(crate) fn with_provider(
        mut self,
        authorize: AuthorizeEndpoint,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        self.authorize = Some(authorize);
        self.provider = Some(provider);
        self
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.authorize.is_some() && self.provider.is_some()
    }

    /// (未消费 state 数, 待确认绑定数)。
    pub(crate) async fn pending_counts(&self) -> (usize, usize) {
        (
            self.states.len().await.unwrap_or_default(),
            self.links.len().await.unwrap_or_default(),
        )
    }

    async fn current_user(&self, session: Option<&str>) -> Result<i64, OAuthError> {
        authenticate(self.sessions.as_ref(), self.users.as_ref(), session)
            .await
            .map_err(|err| match err {
                AuthenticateError::Rejected(failure) => OAuthError::Unauthorized(failure),
                AuthenticateError::Backend(message) => OAuthError::Internal(message),
            })
    }

    async fn mint(&self, user_id: i64) -> Result<String, OAuthError> {
        self.sessions
            .issue(user_id)
            .await
            .map_err(|err| OAuthError::SessionMint(err.to_string()))
    }
}

fn internal_store(err: StoreError) -> OAuthError {
    warn!(error = %err, "oauth store failure");
    OAuthError::Internal(err.to_string())
}

fn internal_users(err: UserStoreError) -> OAuthError {
    warn!(error = %err, "user store failure");
    OAuthError::Internal(err.to_string())
}


#[cfg(test)]
mod tests {
    use super::OAuthAction;

    #[test]
    fn action_defaults_to_login_and_rejects_unknown_values() {
        assert_eq!(OAuthAction::parse(""), Some(OAuthAction::Login));
        assert_eq!(OAuthAction::parse(" link "), Some(OAuthAction::Link));
        assert_eq!(OAuthAction::parse("admin"), None);
    }
}

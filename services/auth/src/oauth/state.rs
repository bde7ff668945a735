//! CSRF state：发起时签发，回调时一次性消费。

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    OAuthAction, OAuthError, OAuthService, STATE_HANDLE_BYTES, internal_store, internal_users,
};
use crate::{
    api::types::{OAuthBeginData, OAuthCallbackData},
    auth::AuthFailure,
    rendezvous::{Handle, OneShot, Staged, StoreError, take_once},
    users::{ExternalIdentity, UserStoreError},
};

/// state 载荷；`user_id` 仅在绑定流程中存在。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct OAuthState {
    stage: OneShot,
    pub(crate) action: OAuthAction,
    pub(crate) user_id: Option<i64>,
}

impl Staged for OAuthState {
    type Stage = OneShot;
    const KIND: &'static str = "oauth_state";

    fn stage(&self) -> OneShot {
        self.stage
    }

    fn set_stage(&mut self, stage: OneShot, _at_ms: u64) {
        self.stage = stage;
    }
}

impl OAuthService {
    /// 发起授权：绑定流程要求已登录。
    pub(crate) async fn begin(
        &self,
        action: OAuthAction,
        session: Option<&str>,
    ) -> Result<OAuthBeginData, OAuthError> {
        let endpoint = self.authorize.as_ref().ok_or(OAuthError::NotConfigured)?;
        if self.provider.is_none() {
            return Err(OAuthError::NotConfigured);
        }
        let user_id = match action {
            OAuthAction::Login => None,
            OAuthAction::Link => Some(self.current_user(session).await?),
        };

        let handle = Handle::generate(STATE_HANDLE_BYTES);
        let authorize_url = endpoint
            .url_for(handle.as_str())
            .map_err(|err| OAuthError::Internal(err.to_string()))?;
        let payload = OAuthState {
            stage: OneShot::Issued,
            action,
            user_id,
        };
        let entry = self
            .states
            .put(handle, payload, self.ttl_ms)
            .await
            .map_err(internal_store)?;
        info!(
            state = entry.handle.fingerprint(),
            ?action,
            user_id,
            "oauth flow started"
        );
        Ok(OAuthBeginData {
            state: entry.handle.as_str().to_string(),
            authorize_url,
            expire_time: entry.expire_at_ms(),
        })
    }

    /// 授权回调：消费 state，换取外部身份后按发起目的处理。
    pub(crate) async fn callback(
        &self,
        state: &str,
        code: &str,
        provider_error: Option<&str>,
    ) -> Result<OAuthCallbackData, OAuthError> {
        let provider = self.provider.as_ref().ok_or(OAuthError::NotConfigured)?;
        if let Some(denied) = provider_error.map(str::trim).filter(|e| !e.is_empty()) {
            warn!(error = denied, "identity provider reported an error");
            return Err(OAuthError::Denied(denied.to_string()));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(OAuthError::StateInvalid);
        }
        let handle = Handle::parse(state, STATE_HANDLE_BYTES).ok_or(OAuthError::StateInvalid)?;
        let entry = take_once(self.states.as_ref(), &handle)
            .await
            .map_err(|err| match err {
                StoreError::NotFound | StoreError::Conflict { .. } => {
                    warn!(state = handle.fingerprint(), "unknown or replayed oauth state");
                    OAuthError::StateInvalid
                }
                other => internal_store(other),
            })?;

        let identity = provider.exchange_code(code).await?;
        match entry.payload.action {
            OAuthAction::Link => {
                let user_id = entry
                    .payload
                    .user_id
                    .filter(|id| *id > 0)
                    .ok_or(OAuthError::Unauthorized(AuthFailure::Invalid))?;
                self.link_identity(user_id, &identity).await?;
                Ok(OAuthCallbackData::Linked { user_id })
            }
            OAuthAction::Login => self.login_with(identity).await,
        }
    }

    async fn link_identity(
        &self,
        user_id: i64,
        identity: &ExternalIdentity,
    ) -> Result<(), OAuthError> {
        match self.users.link_provider(user_id, identity).await {
            Ok(()) => {
                info!(user_id, "external identity linked");
                Ok(())
            }
            Err(UserStoreError::AlreadyLinked { owner }) => {
                warn!(user_id, owner, "external identity linked elsewhere");
                Err(OAuthError::AlreadyLinked)
            }
            Err(UserStoreError::NotFound) => Err(OAuthError::UserNotFound),
            Err(err) => Err(internal_users(err)),
        }
    }

    /// 登录：已绑定直接签发会话；邮箱匹配未绑定账号时转入待确认绑定。
    async fn login_with(&self, identity: ExternalIdentity) -> Result<OAuthCallbackData, OAuthError> {
        if let Some(user) = self
            .users
            .find_by_provider_id(&identity.provider_id)
            .await
            .map_err(internal_users)?
        {
            let session_token = self.mint(user.id).await?;
            info!(user_id = user.id, "oauth login succeeded");
            return Ok(OAuthCallbackData::LoggedIn {
                user_id: user.id,
                session_token,
            });
        }

        if let Some(email) = identity.email.as_deref()
            && let Some(user) = self
                .users
                .find_by_email(email)
                .await
                .map_err(internal_users)?
            && user.provider_id.is_none()
        {
            let entry = self.stash_link(user.id, identity).await?;
            return Ok(OAuthCallbackData::PendingLink {
                link_token: entry.handle.as_str().to_string(),
                expire_time: entry.expire_at_ms(),
            });
        }

        info!("no local account for external identity");
        Err(OAuthError::NoLinkedAccount)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::types::OAuthCallbackData,
        auth::{AuthFailure, session::SessionIssuer},
        oauth::{
            OAuthAction, OAuthError,
            testing::{OAUTH_TTL_MS, fixture},
        },
        users::UserStore,
    };

    #[tokio::test]
    async fn login_with_linked_identity_mints_a_session() {
        let fx = fixture().await;
        let begun = fx
            .service
            .begin(OAuthAction::Login, None)
            .await
            .expect("begin");
        assert_eq!(begun.state.len(), 32);
        assert!(begun.authorize_url.contains(&format!("state={}", begun.state)));
        assert_eq!(begun.expire_time, OAUTH_TTL_MS);

        let outcome = fx
            .service
            .callback(&begun.state, "code-b", None)
            .await
            .expect("callback");
        let (user_id, session_token) = match outcome {
            OAuthCallbackData::LoggedIn {
                user_id,
                session_token,
            } => (user_id, session_token),
            other => panic!("expected login, got {other:?}"),
        };
        assert_eq!(user_id, 2);
        assert_eq!(fx.issuer.verify(&session_token).await.expect("valid").uid, 2);
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let fx = fixture().await;
        let begun = fx.service.begin(OAuthAction::Login, None).await.expect("begin");
        fx.service
            .callback(&begun.state, "code-b", None)
            .await
            .expect("first callback");
        assert!(matches!(
            fx.service.callback(&begun.state, "code-b", None).await,
            Err(OAuthError::StateInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_or_forged_state_is_rejected() {
        let fx = fixture().await;
        let begun = fx.service.begin(OAuthAction::Login, None).await.expect("begin");
        fx.clock.set(OAUTH_TTL_MS + 1);
        assert!(matches!(
            fx.service.callback(&begun.state, "code-b", None).await,
            Err(OAuthError::StateInvalid)
        ));
        assert!(matches!(
            fx.service.callback("not-a-state", "code-b", None).await,
            Err(OAuthError::StateInvalid)
        ));
    }

    #[tokio::test]
    async fn provider_denial_and_bad_code_are_reported() {
        let fx = fixture().await;
        let begun = fx.service.begin(OAuthAction::Login, None).await.expect("begin");
        assert!(matches!(
            fx.service
                .callback(&begun.state, "", Some("access_denied"))
                .await,
            Err(OAuthError::Denied(ref reason)) if reason == "access_denied"
        ));
        assert!(matches!(
            fx.service.callback(&begun.state, "code-unknown", None).await,
            Err(OAuthError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn unknown_identity_has_no_linked_account() {
        let fx = fixture().await;
        let begun = fx.service.begin(OAuthAction::Login, None).await.expect("begin");
        assert!(matches!(
            fx.service.callback(&begun.state, "code-new", None).await,
            Err(OAuthError::NoLinkedAccount)
        ));
    }

    #[tokio::test]
    async fn email_match_creates_pending_link_instead_of_linking() {
        let fx = fixture().await;
        let begun = fx.service.begin(OAuthAction::Login, None).await.expect("begin");
        let outcome = fx
            .service
            .callback(&begun.state, "code-a", None)
            .await
            .expect("callback");
        assert!(matches!(
            outcome,
            OAuthCallbackData::PendingLink { ref link_token, .. } if link_token.len() == 48
        ));
        let user = fx.users.find_by_id(1).await.expect("query").expect("user");
        assert_eq!(user.provider_id, None);
    }

    #[tokio::test]
    async fn link_flow_requires_session_and_links_current_user() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.begin(OAuthAction::Link, None).await,
            Err(OAuthError::Unauthorized(AuthFailure::Missing))
        ));

        let session = fx.session_for(1).await;
        let begun = fx
            .service
            .begin(OAuthAction::Link, Some(&session))
            .await
            .expect("begin link");
        let outcome = fx
            .service
            .callback(&begun.state, "code-new", None)
            .await
            .expect("link");
        assert_eq!(outcome, OAuthCallbackData::Linked { user_id: 1 });
        let user = fx.users.find_by_id(1).await.expect("query").expect("user");
        assert_eq!(user.provider_id.as_deref(), Some("ext-new"));
    }

    #[tokio::test]
    async fn link_flow_rejects_identity_owned_by_someone_else() {
        let fx = fixture().await;
        let session = fx.session_for(1).await;
        let begun = fx
            .service
            .begin(OAuthAction::Link, Some(&session))
            .await
            .expect("begin link");
        assert!(matches!(
            fx.service.callback(&begun.state, "code-b", None).await,
            Err(OAuthError::AlreadyLinked)
        ));
    }
}

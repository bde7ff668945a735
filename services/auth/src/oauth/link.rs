//! 待确认绑定：邮箱匹配到未绑定账号时暂存外部身份，由用户确认后完成绑定并登录。

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{LINK_HANDLE_BYTES, OAuthError, OAuthService, internal_store};
use crate::{
    api::types::{ConfirmLinkData, PendingLinkData},
    rendezvous::{Handle, OneShot, RendezvousEntry, Staged, StoreError, take_once},
    users::{ExternalIdentity, UserStoreError},
};

/// 待确认绑定载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PendingLink {
    stage: OneShot,
    pub(crate) user_id: i64,
    pub(crate) identity: ExternalIdentity,
}

impl Staged for PendingLink {
    type Stage = OneShot;
    const KIND: &'static str = "pending_link";

    fn stage(&self) -> OneShot {
        self.stage
    }

    fn set_stage(&mut self, stage: OneShot, _at_ms: u64) {
        self.stage = stage;
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum LinkError {
    /// 令牌格式错误、不存在、过期或已使用。
    #[error("link token is invalid")]
    Invalid,
    #[error("user not found")]
    UserNotFound,
    #[error("external identity already linked")]
    AlreadyLinked,
    #[error("session mint failed: {0}")]
    SessionMint(String),
    #[error("link internal failure: {0}")]
    Internal(String),
}

fn link_store_error(err: StoreError) -> LinkError {
    match err {
        StoreError::NotFound | StoreError::Conflict { .. } => LinkError::Invalid,
        other => {
            warn!(error = %other, "pending link store failure");
            LinkError::Internal(other.to_string())
        }
    }
}

impl OAuthService {
    pub(super) async fn stash_link(
        &self,
        user_id: i64,
        identity: ExternalIdentity,
    ) -> Result<RendezvousEntry<PendingLink>, OAuthError> {
        let payload = PendingLink {
            stage: OneShot::Issued,
            user_id,
            identity,
        };
        let entry = self
            .links
            .put(Handle::generate(LINK_HANDLE_BYTES), payload, self.ttl_ms)
            .await
            .map_err(internal_store)?;
        info!(
            link = entry.handle.fingerprint(),
            user_id, "pending link awaiting confirmation"
        );
        Ok(entry)
    }

    /// 查看待确认绑定（不消费）。
    pub(crate) async fn peek_link(&self, token: &str) -> Result<PendingLinkData, LinkError> {
        let handle = Handle::parse(token, LINK_HANDLE_BYTES).ok_or(LinkError::Invalid)?;
        let entry = self.links.get(&handle).await.map_err(link_store_error)?;
        let user = self
            .users
            .find_by_id(entry.payload.user_id)
            .await
            .map_err(|err| LinkError::Internal(err.to_string()))?
            .ok_or(LinkError::UserNotFound)?;
        let expire_time = entry.expire_at_ms();
        let identity = entry.payload.identity;
        Ok(PendingLinkData {
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            email: identity.email,
            username: user.username,
            user_avatar_url: user.avatar_url,
            expire_time,
        })
    }

    /// 确认绑定：消费令牌、绑定外部身份并签发会话。
    pub(crate) async fn confirm_link(&self, token: &str) -> Result<ConfirmLinkData, LinkError> {
        let handle = Handle::parse(token, LINK_HANDLE_BYTES).ok_or(LinkError::Invalid)?;
        let entry = take_once(self.links.as_ref(), &handle)
            .await
            .map_err(link_store_error)?;
        let PendingLink {
            user_id, identity, ..
        } = entry.payload;

        match self.users.link_provider(user_id, &identity).await {
            Ok(()) => {}
            Err(UserStoreError::NotFound) => return Err(LinkError::UserNotFound),
            Err(UserStoreError::AlreadyLinked { owner }) => {
                warn!(user_id, owner, "pending link lost to an existing binding");
                return Err(LinkError::AlreadyLinked);
            }
            Err(err) => return Err(LinkError::Internal(err.to_string())),
        }

        let session_token = self
            .sessions
            .issue(user_id)
            .await
            .map_err(|err| LinkError::SessionMint(err.to_string()))?;
        info!(link = handle.fingerprint(), user_id, "pending link confirmed");
        Ok(ConfirmLinkData {
            user_id,
            session_token,
        })
    }
}

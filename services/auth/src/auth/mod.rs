//! 鉴权模块：外部令牌编解码、会话签发与 HTTP 凭证承载。

pub(crate) mod cookie;
pub(crate) mod session;
pub(crate) mod token_codec;

use session::SessionIssuer;

use crate::users::UserStore;

/// 请求携带的会话缺失或无效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthFailure {
    /// 未携带会话。
    Missing,
    /// 会话无效、过期或用户已不存在。
    Invalid,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum AuthenticateError {
    #[error("session rejected: {0:?}")]
    Rejected(AuthFailure),
    #[error("user lookup failed: {0}")]
    Backend(String),
}

/// 校验会话令牌并确认用户仍存在，返回用户 id。
pub(crate) async fn authenticate(
    sessions: &dyn SessionIssuer,
    users: &dyn UserStore,
    session: Option<&str>,
) -> Result<i64, AuthenticateError> {
    let session = session
        .map(str::trim)
        .filter(|session| !session.is_empty())
        .ok_or(AuthenticateError::Rejected(AuthFailure::Missing))?;
    let claims = sessions
        .verify(session)
        .await
        .map_err(|_| AuthenticateError::Rejected(AuthFailure::Invalid))?;
    if claims.uid <= 0 {
        return Err(AuthenticateError::Rejected(AuthFailure::Invalid));
    }
    match users.find_by_id(claims.uid).await {
        Ok(Some(_)) => Ok(claims.uid),
        Ok(None) => Err(AuthenticateError::Rejected(AuthFailure::Invalid)),
        Err(err) => Err(AuthenticateError::Backend(err.to_string())),
    }
}

//! OAuth HTTP 路由处理函数。

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use tracing::warn;

use super::{LinkError, OAuthAction, OAuthError};
use crate::{
    api::{
        error::ApiError,
        response::{ApiReply, CookieReply, reply, with_set_cookie},
        types::{
            ConfirmLinkData, ConfirmLinkRequest, OAuthBeginData, OAuthBeginRequest,
            OAuthCallbackData, OAuthCallbackQuery, PendingLinkData, TokenQuery,
        },
    },
    auth::{AuthFailure, cookie::session_token_from_headers},
    state::AppState,
};

/// 发起授权；`link` 需要携带当前会话。
pub(crate) async fn oauth_begin_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OAuthBeginRequest>,
) -> ApiReply<OAuthBeginData> {
    let Some(action) = OAuthAction::parse(&req.action) else {
        return oauth_error(OAuthError::InvalidAction).into_response();
    };
    let session = session_token_from_headers(&headers);
    reply(
        state.oauth.begin(action, session.as_deref()).await,
        "授权已发起",
        oauth_error,
    )
}

/// 授权回调；直接登录时写入会话 cookie。
pub(crate) async fn oauth_callback_handler(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> CookieReply<OAuthCallbackData> {
    let result = state
        .oauth
        .callback(&query.state, &query.code, query.error.as_deref())
        .await;
    let cookie = match &result {
        Ok(OAuthCallbackData::LoggedIn { session_token, .. }) => {
            state.session_cookie(session_token)
        }
        _ => None,
    };
    with_set_cookie(reply(result, "授权完成", oauth_error), cookie)
}

/// 查看待确认绑定。
pub(crate) async fn pending_link_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiReply<PendingLinkData> {
    reply(
        state.oauth.peek_link(&query.token).await,
        "待确认绑定",
        link_error,
    )
}

/// 确认绑定并登录。
pub(crate) async fn confirm_link_handler(
    State(state): State<AppState>,
    Json(req): Json<ConfirmLinkRequest>,
) -> CookieReply<ConfirmLinkData> {
    let result = state.oauth.confirm_link(&req.token).await;
    let cookie = result
        .as_ref()
        .ok()
        .and_then(|data| state.session_cookie(&data.session_token));
    with_set_cookie(reply(result, "账号已绑定", link_error), cookie)
}

fn oauth_error(err: OAuthError) -> ApiError {
    match err {
        OAuthError::NotConfigured => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "OAUTH_NOT_CONFIGURED",
            "第三方登录未配置",
            "请联系管理员配置身份提供方",
        ),
        OAuthError::InvalidAction => ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_ACTION",
            "不支持的操作类型",
            "action 仅支持 login 或 link",
        ),
        OAuthError::Unauthorized(AuthFailure::Missing) => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "NOT_LOGGED_IN",
            "请先登录",
            "登录后再绑定第三方账号",
        ),
        OAuthError::Unauthorized(AuthFailure::Invalid) => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SESSION",
            "登录状态已失效",
            "请重新登录",
        ),
        OAuthError::StateInvalid => ApiError::new(
            StatusCode::BAD_REQUEST,
            "OAUTH_STATE_INVALID",
            "授权请求无效或已过期",
            "请重新发起授权",
        ),
        OAuthError::Denied(_) => ApiError::new(
            StatusCode::BAD_REQUEST,
            "OAUTH_DENIED",
            "授权被拒绝",
            "如需继续请重新授权",
        ),
        OAuthError::Provider(err) => {
            warn!(error = %err, "identity provider failure");
            ApiError::new(
                StatusCode::BAD_GATEWAY,
                "OAUTH_PROVIDER_FAILED",
                "身份提供方暂时不可用",
                "请稍后重试",
            )
        }
        OAuthError::AlreadyLinked => ApiError::new(
            StatusCode::CONFLICT,
            "ALREADY_LINKED",
            "该第三方账号已绑定其他用户",
            "请使用已绑定的账号登录",
        ),
        OAuthError::NoLinkedAccount => ApiError::new(
            StatusCode::NOT_FOUND,
            "NO_LINKED_ACCOUNT",
            "未找到关联账号",
            "请先登录已有账号后再绑定",
        ),
        OAuthError::UserNotFound => ApiError::new(
            StatusCode::NOT_FOUND,
            "USER_NOT_FOUND",
            "用户不存在",
            "请重新登录",
        ),
        OAuthError::SessionMint(_) => ApiError::internal("SESSION_CREATE_FAILED"),
        OAuthError::Internal(_) => ApiError::internal("INTERNAL_ERROR"),
    }
}

fn link_error(err: LinkError) -> ApiError {
    match err {
        LinkError::Invalid => ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_TOKEN",
            "绑定链接无效或已过期",
            "请重新使用第三方账号登录",
        ),
        LinkError::UserNotFound => ApiError::new(
            StatusCode::NOT_FOUND,
            "USER_NOT_FOUND",
            "用户不存在",
            "请重新登录",
        ),
        LinkError::AlreadyLinked => ApiError::new(
            StatusCode::CONFLICT,
            "ALREADY_LINKED",
            "该第三方账号已绑定其他用户",
            "请使用已绑定的账号登录",
        ),
        LinkError::SessionMint(_) => ApiError::internal("SESSION_CREATE_FAILED"),
        LinkError::Internal(_) => ApiError::internal("LINK_FAILED"),
    }
}

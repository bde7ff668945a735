//! 扫码登录 HTTP 路由处理函数。

use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
};
use rdv_shared_protocol::QrStatus;
use tracing::warn;

use super::CancelOrigin;
use crate::{
    api::{
        error::ApiError,
        response::{ApiReply, CookieReply, ok_response, reply, with_set_cookie},
        types::{
            QrIssueData, QrScanData, QrStatusData, QrTokenRequest, QrWaitData, QrWaitQuery,
            SetSessionRequest, TokenQuery, UNKNOWN_IP, WAIT_DEFAULT_MS, WAIT_MAX_MS, WAIT_MIN_MS,
        },
    },
    auth::{AuthFailure, cookie::session_token_from_headers},
    qr_login::QrLoginError,
    state::AppState,
};

/// 桌面端申请二维码。
pub(crate) async fn qr_generate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiReply<QrIssueData> {
    let ip = client_ip(&headers);
    let user_agent = user_agent(&headers);
    reply(
        state.qr.issue(&ip, &user_agent).await,
        "二维码已生成",
        |err| match err {
            QrLoginError::NotConfigured => not_configured(),
            other => {
                warn!(error = %other, "qr generate failed");
                ApiError::internal("QR_TOKEN_GENERATE_FAILED")
            }
        },
    )
}

/// 移动端扫码。令牌错误、不存在与已使用统一为同一错误码。
pub(crate) async fn qr_scan_handler(
    State(state): State<AppState>,
    Json(req): Json<QrTokenRequest>,
) -> ApiReply<QrScanData> {
    if req.token.trim().is_empty() {
        return ApiError::missing_token().into_response();
    }
    reply(state.qr.scan(&req.token).await, "扫码成功", |err| match err {
        QrLoginError::InvalidToken | QrLoginError::NotFound | QrLoginError::Conflict { .. } => {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "QR_CODE_INVALID",
                "二维码无效或已过期",
                "请在电脑上刷新二维码后重新扫描",
            )
        }
        QrLoginError::NotConfigured => not_configured(),
        other => {
            warn!(error = %other, "qr scan failed");
            ApiError::internal("QR_SCAN_FAILED")
        }
    })
}

/// 移动端确认登录；需携带移动端会话。
pub(crate) async fn qr_mobile_confirm_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QrTokenRequest>,
) -> ApiReply<()> {
    if req.token.trim().is_empty() {
        return ApiError::missing_token().into_response();
    }
    let phone_session = session_token_from_headers(&headers);
    match state.qr.confirm(&req.token, phone_session.as_deref()).await {
        Ok(()) => ok_response(StatusCode::OK, "登录已确认", "请在电脑上继续操作", None),
        Err(err) => confirm_error(err).into_response(),
    }
}

/// 桌面端取消。恒为成功。
pub(crate) async fn qr_cancel_handler(
    State(state): State<AppState>,
    Json(req): Json<QrTokenRequest>,
) -> ApiReply<()> {
    state.qr.cancel(&req.token, CancelOrigin::Desktop).await;
    ok_response(StatusCode::OK, "已取消", "", None)
}

/// 移动端取消。恒为成功。
pub(crate) async fn qr_mobile_cancel_handler(
    State(state): State<AppState>,
    Json(req): Json<QrTokenRequest>,
) -> ApiReply<()> {
    state.qr.cancel(&req.token, CancelOrigin::Mobile).await;
    ok_response(StatusCode::OK, "已取消", "", None)
}

/// 桌面端轮询状态。
pub(crate) async fn qr_status_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiReply<QrStatusData> {
    reply(state.qr.status(&query.token).await, "状态获取成功", watch_error)
}

/// 桌面端长轮询。
pub(crate) async fn qr_wait_handler(
    State(state): State<AppState>,
    Query(query): Query<QrWaitQuery>,
) -> ApiReply<QrWaitData> {
    let known = query.known.as_deref().and_then(QrStatus::parse);
    let timeout = Duration::from_millis(
        query
            .timeout_ms
            .unwrap_or(WAIT_DEFAULT_MS)
            .clamp(WAIT_MIN_MS, WAIT_MAX_MS),
    );
    let result = state
        .qr
        .wait(&query.token, known, timeout)
        .await
        .map(|outcome| match outcome {
            Some(message) => QrWaitData {
                status: message.status.as_str().to_string(),
                session_token: message.session_token,
            },
            None => QrWaitData {
                status: "waiting".to_string(),
                session_token: None,
            },
        });
    reply(result, "状态获取成功", watch_error)
}

/// 桌面端拿到会话令牌后写入 cookie。
pub(crate) async fn qr_set_session_handler(
    State(state): State<AppState>,
    Json(req): Json<SetSessionRequest>,
) -> CookieReply<()> {
    let token = req.session_token.trim();
    if token.is_empty() {
        return with_set_cookie(ApiError::missing_token().into_response(), None);
    }
    if let Err(err) = state.sessions.verify(token).await {
        warn!(error = %err, "set-session rejected");
        return with_set_cookie(
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_SESSION",
                "会话令牌无效",
                "请重新扫码登录",
            )
            .into_response(),
            None,
        );
    }
    match state.session_cookie(token) {
        Some(cookie) => with_set_cookie(
            ok_response(StatusCode::OK, "登录成功", "", None),
            Some(cookie),
        ),
        None => with_set_cookie(ApiError::internal("SESSION_COOKIE_FAILED").into_response(), None),
    }
}

fn not_configured() -> ApiError {
    ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "QR_NOT_CONFIGURED",
        "扫码登录未启用",
        "请联系管理员配置加密密钥",
    )
}

fn token_not_found() -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "TOKEN_NOT_FOUND",
        "二维码不存在或已过期",
        "请刷新二维码",
    )
}

fn confirm_error(err: QrLoginError) -> ApiError {
    match err {
        QrLoginError::Unauthorized(AuthFailure::Missing) => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "NOT_LOGGED_IN",
            "请先登录",
            "在手机上登录后再确认",
        ),
        QrLoginError::Unauthorized(AuthFailure::Invalid) => ApiError::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SESSION",
            "登录状态已失效",
            "请在手机上重新登录",
        ),
        QrLoginError::InvalidToken | QrLoginError::NotFound => token_not_found(),
        QrLoginError::Conflict { .. } => ApiError::new(
            StatusCode::CONFLICT,
            "TOKEN_ALREADY_USED",
            "二维码已被使用",
            "请在电脑上刷新二维码",
        ),
        QrLoginError::NotConfigured => not_configured(),
        QrLoginError::SessionMint(_) => ApiError::internal("SESSION_CREATE_FAILED"),
        QrLoginError::Busy | QrLoginError::Internal(_) => {
            warn!(error = %err, "qr confirm failed");
            ApiError::internal("INTERNAL_ERROR")
        }
    }
}

/// 状态/等待接口的错误映射。
pub(crate) fn watch_error(err: QrLoginError) -> ApiError {
    match err {
        QrLoginError::InvalidToken | QrLoginError::NotFound | QrLoginError::Conflict { .. } => {
            token_not_found()
        }
        QrLoginError::NotConfigured => not_configured(),
        QrLoginError::Busy => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "TOO_MANY_WAITERS",
            "等待连接过多",
            "请稍后刷新页面",
        ),
        other => {
            warn!(error = %other, "qr watch failed");
            ApiError::internal("INTERNAL_ERROR")
        }
    }
}

/// 客户端 IP：`X-Forwarded-For` 首项，其次 `X-Real-IP`。
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_IP)
        .to_string()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

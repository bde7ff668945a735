//! API 响应包裹。

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use serde::Serialize;

use super::error::ApiError;

/// 通用 API 成功/失败包裹结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiEnvelope<T>
where
    T: Serialize,
{
    pub(crate) ok: bool,
    pub(crate) code: String,
    pub(crate) message: String,
    pub(crate) suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<T>,
}

/// 接口返回类型。
pub(crate) type ApiReply<T> = (StatusCode, Json<ApiEnvelope<T>>);

/// 可能携带 `Set-Cookie` 的接口返回类型。
pub(crate) type CookieReply<T> = (StatusCode, HeaderMap, Json<ApiEnvelope<T>>);

/// 构造成功响应。
pub(crate) fn ok_response<T: Serialize>(
    status: StatusCode,
    message: impl Into<String>,
    suggestion: impl Into<String>,
    data: Option<T>,
) -> ApiReply<T> {
    (
        status,
        Json(ApiEnvelope {
            ok: true,
            code: "OK".to_string(),
            message: message.into(),
            suggestion: suggestion.into(),
            data,
        }),
    )
}

/// 把领域结果渲染为响应：成功走 `ok_response`，失败经 `map_err` 映射为错误码。
pub(crate) fn reply<T, E>(
    result: Result<T, E>,
    message: &str,
    map_err: impl FnOnce(E) -> ApiError,
) -> ApiReply<T>
where
    T: Serialize,
{
    match result {
        Ok(data) => ok_response(StatusCode::OK, message, "", Some(data)),
        Err(err) => map_err(err).into_response(),
    }
}

/// 给响应附加 `Set-Cookie`；`cookie` 为空时原样返回。
pub(crate) fn with_set_cookie<T: Serialize>(
    reply: ApiReply<T>,
    cookie: Option<HeaderValue>,
) -> CookieReply<T> {
    let (status, body) = reply;
    let mut headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        headers.insert(header::SET_COOKIE, cookie);
    }
    (status, headers, body)
}

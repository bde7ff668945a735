//! 会话凭证的 HTTP 承载：`token` cookie 或 `Authorization: Bearer`。

use axum::http::{HeaderMap, HeaderValue, header};

/// 会话 cookie 名称。
pub(crate) const SESSION_COOKIE: &str = "token";

/// 从请求头读取会话令牌；Bearer 优先于 cookie。
pub(crate) fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(bearer.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// 构造会话 cookie。令牌来自签发器，字符集为 base64url 与 `.`，总能放进头部。
pub(crate) fn session_set_cookie(
    token: &str,
    max_age_sec: u64,
    secure: bool,
) -> Option<HeaderValue> {
    let secure_attr = if secure { "; Secure" } else { "" };
    let raw = format!(
        "{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age_sec}; HttpOnly{secure_attr}; SameSite=Lax"
    );
    HeaderValue::from_str(&raw).ok()
}

//! API 请求/响应类型与协议常量。

use rdv_shared_protocol::{DesktopInfo, QrStatus};
use serde::{Deserialize, Serialize};

/// 携带外部令牌的请求体（扫码/确认/取消共用）。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrTokenRequest {
    #[serde(default)]
    pub(crate) token: String,
}

/// 携带令牌的 query（二维码令牌或绑定令牌）。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenQuery {
    #[serde(default)]
    pub(crate) token: String,
}

/// 签发二维码返回数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrIssueData {
    pub(crate) token: String,
    /// 绝对过期时间（unix 毫秒）。
    pub(crate) expire_time: u64,
}

/// 扫码返回数据：展示给移动端确认的桌面端信息。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrScanData {
    pub(crate) desktop_info: DesktopInfo,
    pub(crate) expire_time: u64,
}

/// 会话状态快照。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrStatusData {
    pub(crate) status: QrStatus,
    pub(crate) expire_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scanned_at: Option<u64>,
}

/// 长轮询 query。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrWaitQuery {
    #[serde(default)]
    pub(crate) token: String,
    /// 桌面端已知状态；与服务端不同则立即返回。
    #[serde(default)]
    pub(crate) known: Option<String>,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

/// 长轮询返回数据；超时时 `status = "waiting"`。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QrWaitData {
    pub(crate) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) session_token: Option<String>,
}

/// 桌面端写入会话 cookie 的请求。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetSessionRequest {
    #[serde(default)]
    pub(crate) session_token: String,
}

/// OAuth 发起请求。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OAuthBeginRequest {
    #[serde(default)]
    pub(crate) action: String,
}

/// OAuth 发起返回数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OAuthBeginData {
    pub(crate) state: String,
    pub(crate) authorize_url: String,
    pub(crate) expire_time: u64,
}

/// OAuth 回调 query。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OAuthCallbackQuery {
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) code: String,
    /// 身份提供方回传的错误（用户拒绝授权等）。
    #[serde(default)]
    pub(crate) error: Option<String>,
}

/// OAuth 回调结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub(crate) enum OAuthCallbackData {
    /// 已为当前用户绑定外部身份。
    #[serde(rename_all = "camelCase")]
    Linked { user_id: i64 },
    /// 外部身份已绑定，直接登录。
    #[serde(rename_all = "camelCase")]
    LoggedIn { user_id: i64, session_token: String },
    /// 邮箱匹配到未绑定账号，等待用户确认绑定。
    #[serde(rename_all = "camelCase")]
    PendingLink { link_token: String, expire_time: u64 },
}

/// 待确认绑定展示数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PendingLinkData {
    pub(crate) display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) email: Option<String>,
    pub(crate) username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) user_avatar_url: Option<String>,
    pub(crate) expire_time: u64,
}

/// 确认绑定请求。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmLinkRequest {
    #[serde(default)]
    pub(crate) token: String,
}

/// 确认绑定返回数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmLinkData {
    pub(crate) user_id: i64,
    pub(crate) session_token: String,
}

/// 调试统计。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DebugStatsData {
    pub(crate) qr_configured: bool,
    pub(crate) oauth_configured: bool,
    pub(crate) qr_sessions: usize,
    pub(crate) oauth_states: usize,
    pub(crate) pending_links: usize,
    pub(crate) notify_topics: usize,
    pub(crate) notify_subscribers: usize,
    pub(crate) server_time: String,
}

/// 长轮询默认等待（毫秒）。
pub(crate) const WAIT_DEFAULT_MS: u64 = 25_000;
/// 长轮询等待下限（毫秒）。
pub(crate) const WAIT_MIN_MS: u64 = 1_000;
/// 长轮询等待上限（毫秒）。
pub(crate) const WAIT_MAX_MS: u64 = 30_000;
/// WS 心跳间隔（秒）。
pub(crate) const WS_PING_INTERVAL_SEC: u64 = 30;
/// WS 连接最长存活（秒）。
pub(crate) const WS_MAX_LIFETIME_SEC: u64 = 300;
/// 客户端 IP 缺失时的占位。
pub(crate) const UNKNOWN_IP: &str = "unknown";
/// 存储的桌面端 User-Agent 最大长度。
pub(crate) const MAX_USER_AGENT_LEN: usize = 512;

// 文件职责：
// 1) 定义扫码登录桌面端/移动端/服务端共用的协议数据结构。
// 2) 提供毫秒时间戳、RFC3339 时间等跨端一致的基础函数。
// 3) 作为 Rust 侧协议唯一代码源，供服务端与测试客户端复用。

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 扫码登录会话状态。
///
/// 只允许前向迁移：`pending → scanned → confirmed`，`cancelled` 可从任一非终态到达。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrStatus {
    /// 已签发，等待扫码。
    Pending,
    /// 移动端已扫码，等待确认。
    Scanned,
    /// 移动端已确认（终态）。
    Confirmed,
    /// 任一端取消（终态）。
    Cancelled,
}

impl QrStatus {
    /// 协议字符串形式。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scanned => "scanned",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 从协议字符串解析；未知值返回 `None`。
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(Self::Pending),
            "scanned" => Some(Self::Scanned),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// 是否终态（到达后条目被删除）。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }
}

impl fmt::Display for QrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 推送给桌面端的状态消息（WebSocket 文本帧 / 长轮询响应体）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrStatusMessage {
    // 固定为 `status`。
    #[serde(rename = "type")]
    pub message_type: String,
    // 当前状态。
    pub status: QrStatus,
    // 仅 confirmed 携带：桌面端会话令牌。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl QrStatusMessage {
    /// 构造不带附加数据的状态消息。
    pub fn status(status: QrStatus) -> Self {
        Self {
            message_type: "status".to_string(),
            status,
            session_token: None,
        }
    }

    /// 构造 confirmed 消息。
    pub fn confirmed(session_token: impl Into<String>) -> Self {
        Self {
            message_type: "status".to_string(),
            status: QrStatus::Confirmed,
            session_token: Some(session_token.into()),
        }
    }
}

/// 移动端扫码后看到的桌面端信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopInfo {
    // 桌面端 IP。
    pub ip: String,
    // 浏览器粗粒度标签。
    pub browser: String,
    // 操作系统粗粒度标签。
    pub os: String,
}

/// 当前 unix 毫秒。
pub fn now_unix_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// 生成纳秒精度 UTC 时间戳（RFC3339）。
pub fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::{QrStatus, QrStatusMessage};

    #[test]
    fn status_round_trips_through_protocol_string() {
        for status in [
            QrStatus::Pending,
            QrStatus::Scanned,
            QrStatus::Confirmed,
            QrStatus::Cancelled,
        ] {
            assert_eq!(QrStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QrStatus::parse("expired"), None);
    }

    #[test]
    fn confirmed_message_carries_session_token_in_camel_case() {
        let raw = serde_json::to_value(QrStatusMessage::confirmed("st_1")).expect("encode");
        assert_eq!(raw["type"], "status");
        assert_eq!(raw["status"], "confirmed");
        assert_eq!(raw["sessionToken"], "st_1");

        let scanned = serde_json::to_value(QrStatusMessage::status(QrStatus::Scanned))
            .expect("encode");
        assert!(scanned.get("sessionToken").is_none());
    }

    #[test]
    fn only_confirmed_and_cancelled_are_terminal() {
        assert!(!QrStatus::Pending.is_terminal());
        assert!(!QrStatus::Scanned.is_terminal());
        assert!(QrStatus::Confirmed.is_terminal());
        assert!(QrStatus::Cancelled.is_terminal());
    }
}

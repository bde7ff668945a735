//! 扫码登录状态机：`pending → scanned → confirmed | cancelled`。
//!
//! 每次迁移都经过 `take_if_status`，同一句柄上的并发扫码/确认只有一个赢家。

pub(crate) mod handlers;
mod user_agent;

use std::sync::Arc;

use rdv_shared_protocol::QrStatus;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{session::SessionIssuer, token_codec::TokenCodec},
    clock::SharedClock,
    notify::NotificationHub,
    rendezvous::{RendezvousStore, Stage, Staged},
    users::UserStore,
};

pub(crate) use crate::auth::AuthFailure;
pub(crate) use user_agent::describe_desktop;

/// QR 会话句柄字节数。
pub(crate) const QR_HANDLE_BYTES: usize = 32;

impl Stage for QrStatus {
    fn as_str(self) -> &'static str {
        QrStatus::as_str(self)
    }

    fn is_terminal(self) -> bool {
        QrStatus::is_terminal(self)
    }
}

/// QR 会话载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QrSession {
    pub(crate) status: QrStatus,
    pub(crate) desktop_ip: String,
    pub(crate) desktop_user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) scanned_at_ms: Option<u64>,
}

impl QrSession {
    pub(crate) fn pending(desktop_ip: &str, desktop_user_agent: &str) -> Self {
        Self {
            status: QrStatus::Pending,
            desktop_ip: desktop_ip.to_string(),
            desktop_user_agent: desktop_user_agent.to_string(),
            scanned_at_ms: None,
        }
    }
}

impl Staged for QrSession {
    type Stage = QrStatus;
    const KIND: &'static str = "qr_session";

    fn stage(&self) -> QrStatus {
        self.status
    }

    fn set_stage(&mut self, stage: QrStatus, at_ms: u64) {
        if stage == QrStatus::Scanned {
            self.scanned_at_ms = Some(at_ms);
        }
        self.status = stage;
    }
}

/// 扫码登录错误。
#[derive(Debug, thiserror::Error)]
pub(crate) enum QrLoginError {
    /// 外部令牌格式错误或无法解密。
    #[error("qr token is invalid")]
    InvalidToken,
    /// 句柄不存在或已过期。
    #[error("qr session not found or expired")]
    NotFound,
    /// 句柄存在但状态不符。
    #[error("qr session is already `{current}`")]
    Conflict { current: String },
    #[error("confirming session rejected: {0:?}")]
    Unauthorized(AuthFailure),
    /// 未配置加密密钥。
    #[error("qr login is not configured")]
    NotConfigured,
    /// 等待者数量达到上限。
    #[error("too many qr login waiters")]
    Busy,
    /// 确认已生效但会话签发失败；句柄已被消费。
    #[error("session mint failed: {0}")]
    SessionMint(String),
    #[error("qr login internal failure: {0}")]
    Internal(String),
}

/// 扫码登录服务：存储、编解码、通知与会话签发的组合。
pub(crate) struct QrLoginService {
    store: Arc<dyn RendezvousStore<QrSession>>,
    codec: Option<TokenCodec>,
    hub: Arc<NotificationHub>,
    sessions: Arc<dyn SessionIssuer>,
    users: Arc<dyn UserStore>,
    clock: SharedClock,
    ttl_ms: u64,
}

impl QrLoginService {
    pub(crate) fn new(
        store: Arc<dyn RendezvousStore<QrSession>>,
        codec: Option<TokenCodec>,
        hub: Arc<NotificationHub>,
        sessions: Arc<dyn SessionIssuer>,
        users: Arc<dyn UserStore>,
        clock: SharedClock,
        ttl_ms: u64,
    ) -> Self {
        Self {
            store,
            codec,
            hub,
            sessions,
            users,
            clock,
            ttl_ms,
        }
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.codec.is_some()
    }

    pub(crate) async fn active_sessions(&self) -> usize {
        self.store.len().await.unwrap_or_default()
    }
}

//! 桌面端签发二维码。

use tracing::{error, info};

use super::from_store;
use crate::{
    api::types::{MAX_USER_AGENT_LEN, QrIssueData, QrStatusData},
    qr_login::{QR_HANDLE_BYTES, QrLoginError, QrLoginService, QrSession},
    rendezvous::Handle,
};

impl QrLoginService {
    /// 生成句柄并以 `pending` 入库，返回加密后的外部令牌。无需登录。
    pub(crate) async fn issue(
        &self,
        desktop_ip: &str,
        desktop_user_agent: &str,
    ) -> Result<QrIssueData, QrLoginError> {
        let codec = self.codec.as_ref().ok_or(QrLoginError::NotConfigured)?;
        let handle = Handle::generate(QR_HANDLE_BYTES);
        let user_agent = clip(desktop_user_agent.trim(), MAX_USER_AGENT_LEN);
        let entry = self
            .store
            .put(
                handle.clone(),
                QrSession::pending(desktop_ip, user_agent),
                self.ttl_ms,
            )
            .await
            .map_err(from_store)?;

        let token = match codec.wrap(&handle, entry.created_at_ms) {
            Ok(token) => token,
            Err(err) => {
                error!(handle = handle.fingerprint(), error = %err, "qr token wrap failed");
                let _ = self.store.delete(&handle).await;
                return Err(QrLoginError::Internal(err.to_string()));
            }
        };

        info!(
            handle = handle.fingerprint(),
            ip = desktop_ip,
            "qr session issued"
        );
        Ok(QrIssueData {
            token,
            expire_time: entry.expire_at_ms(),
        })
    }

    /// 桌面端轮询兜底：读取当前状态（含过期检查）。
    pub(crate) async fn status(&self, token: &str) -> Result<QrStatusData, QrLoginError> {
        let handle = self.resolve(token)?;
        let entry = self.store.get(&handle).await.map_err(from_store)?;
        Ok(QrStatusData {
            status: entry.payload.status,
            expire_time: entry.expire_at_ms(),
            scanned_at: entry.payload.scanned_at_ms,
        })
    }
}

/// 按字符边界截断。
fn clip(value: &str, max_len: usize) -> &str {
    if value.len() <= max_len {
        return value;
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

//! 扫码登录接口处理模块。

mod cancel;
mod confirm;
mod http;
mod issue;
mod scan;
mod wait;

pub(crate) use cancel::CancelOrigin;
pub(crate) use http::{
    qr_cancel_handler, qr_generate_handler, qr_mobile_cancel_handler, qr_mobile_confirm_handler,
    qr_scan_handler, qr_set_session_handler, qr_status_handler, qr_wait_handler, watch_error,
};
pub(crate) use wait::QrWatch;

use tracing::warn;

use super::{QrLoginError, QrLoginService};
use crate::{
    auth::token_codec::UnwrappedToken,
    rendezvous::{Handle, StoreError},
};

impl QrLoginService {
    /// 解密外部令牌。格式错误与解密失败不作区分。
    pub(crate) fn open_token(&self, token: &str) -> Result<UnwrappedToken, QrLoginError> {
        let codec = self.codec.as_ref().ok_or(QrLoginError::NotConfigured)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(QrLoginError::InvalidToken);
        }
        codec.unwrap(token).map_err(|_| QrLoginError::InvalidToken)
    }

    /// 外部令牌 → 内部句柄。
    pub(crate) fn resolve(&self, token: &str) -> Result<Handle, QrLoginError> {
        self.open_token(token).map(|unwrapped| unwrapped.handle)
    }
}

/// 存储错误 → 状态机错误；后端细节只进日志。
fn from_store(err: StoreError) -> QrLoginError {
    match err {
        StoreError::NotFound => QrLoginError::NotFound,
        StoreError::Conflict { current } => QrLoginError::Conflict { current },
        StoreError::Duplicate | StoreError::Backend(_) => {
            warn!(error = %err, "qr session store failure");
            QrLoginError::Internal(err.to_string())
        }
    }
}

//! 会话签发：确认完成后为桌面端签发登录会话。
//!
//! 会话令牌格式 `yst_v1.<payload_b64url>.<hmac_b64url>`，payload 为 JSON 声明。

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::clock::SharedClock;

const SESSION_PREFIX: &str = "yst_v1";

type HmacSha256 = Hmac<Sha256>;

/// 会话错误。
#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionError {
    #[error("session token is malformed")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
    #[error("session issuer failure: {0}")]
    Internal(String),
}

/// 会话声明。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionClaims {
    pub(crate) uid: i64,
    pub(crate) iat: u64,
    pub(crate) exp: u64,
    pub(crate) jti: String,
}

/// 外部会话服务接口。
#[async_trait]
pub(crate) trait SessionIssuer: Send + Sync {
    /// 为用户签发新会话令牌。
    async fn issue(&self, user_id: i64) -> Result<String, SessionError>;
    /// 校验会话令牌并返回声明。
    async fn verify(&self, token: &str) -> Result<SessionClaims, SessionError>;
    /// 会话有效期（秒），同时作为 cookie Max-Age。
    fn ttl_sec(&self) -> u64;
}

/// 基于 HMAC-SHA256 的本地会话签发器。
pub(crate) struct HmacSessionIssuer {
    secret: String,
    ttl_sec: u64,
    clock: SharedClock,
}

impl HmacSessionIssuer {
    pub(crate) fn new(secret: impl Into<String>, ttl_sec: u64, clock: SharedClock) -> Self {
        Self {
            secret: secret.into(),
            ttl_sec,
            clock,
        }
    }

    fn now_sec(&self) -> u64 {
        self.clock.now_ms() / 1_000
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| SessionError::Internal(format!("invalid session secret: {err}")))
    }
}

#[async_trait]
impl SessionIssuer for HmacSessionIssuer {
    async fn issue(&self, user_id: i64) -> Result<String, SessionError> {
        let now = self.now_sec();
        let claims = SessionClaims {
            uid: user_id,
            iat: now,
            exp: now.saturating_add(self.ttl_sec),
            jti: Uuid::new_v4().simple().to_string(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|err| SessionError::Internal(format!("encode session claims: {err}")))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{SESSION_PREFIX}.{payload_b64}.{sig_b64}"))
    }

    async fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut parts = token.trim().split('.');
        let version = parts.next().unwrap_or_default();
        let payload_b64 = parts.next().unwrap_or_default();
        let sig_b64 = parts.next().unwrap_or_default();
        if version != SESSION_PREFIX
            || payload_b64.is_empty()
            || sig_b64.is_empty()
            || parts.next().is_some()
        {
            return Err(SessionError::Malformed);
        }

        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64.as_bytes())
            .map_err(|_| SessionError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| SessionError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64.as_bytes())
            .map_err(|_| SessionError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;
        if claims.exp <= self.now_sec() {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    fn ttl_sec(&self) -> u64 {
        self.ttl_sec
    }
}

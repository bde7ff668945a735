//! 配置模块职责：
//! 1. 从环境变量读取服务配置并提供默认值。
//! 2. 启动前校验：缺少会话密钥是硬错误，缺少二维码密钥或 OAuth 配置只告警。
//! 3. 为 `doctor` 提供脱敏后的配置视图。

use std::time::Duration;

use serde::Serialize;

/// 默认监听地址。
pub(crate) const DEFAULT_ADDR: &str = "0.0.0.0:18080";
/// 会话默认有效期（60 天）。
const DEFAULT_SESSION_TTL_SEC: u64 = 60 * 24 * 3600;
/// 二维码会话默认 ttl。
const DEFAULT_QR_TTL_MS: u64 = 180_000;
/// CSRF state 与待确认绑定默认 ttl。
const DEFAULT_OAUTH_TTL_MS: u64 = 600_000;
const DEFAULT_REAPER_INTERVAL_SEC: u64 = 300;
const DEFAULT_WS_MAX_SUBSCRIBERS: usize = 1000;
const DEFAULT_SQLITE_URL: &str = "sqlite::memory:";
const DEFAULT_OAUTH_SCOPE: &str = "openid profile email";

/// 会合存储后端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StoreBackend {
    Memory,
    Sqlite,
}

/// 身份提供方配置；全部必填项齐全时才存在。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OAuthSettings {
    pub(crate) authorize_url: String,
    pub(crate) token_url: String,
    pub(crate) userinfo_url: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) redirect_uri: String,
    pub(crate) scope: String,
}

/// 服务运行时配置。
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) addr: String,
    /// 二维码令牌加密密钥；为空时扫码登录关闭。
    pub(crate) qr_encryption_key: Option<String>,
    pub(crate) session_secret: Option<String>,
    pub(crate) session_ttl_sec: u64,
    pub(crate) qr_ttl_ms: u64,
    pub(crate) oauth_ttl_ms: u64,
    pub(crate) reaper_interval: Duration,
    pub(crate) ws_max_subscribers: usize,
    pub(crate) store_backend: StoreBackend,
    pub(crate) sqlite_url: String,
    pub(crate) oauth: Option<OAuthSettings>,
    pub(crate) cookie_secure: bool,
    /// `id:username[:email]` 逗号分隔的种子用户。
    pub(crate) seed_users: String,
}

/// 校验结果。
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Validation {
    pub(crate) errors: Vec<String>,
    pub(crate) warnings: Vec<String>,
}

impl Validation {
    pub(crate) fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// `doctor` 输出的脱敏配置。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RedactedConfig {
    addr: String,
    qr_encryption_key: &'static str,
    session_secret: &'static str,
    session_ttl_sec: u64,
    qr_ttl_ms: u64,
    oauth_ttl_ms: u64,
    reaper_interval_sec: u64,
    ws_max_subscribers: usize,
    store_backend: StoreBackend,
    sqlite_url: String,
    oauth_configured: bool,
    oauth_client_id: String,
    cookie_secure: bool,
    seed_users: usize,
}

impl Config {
    /// 从进程环境变量构建配置。
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源构建配置；非法值回退默认值。
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str, fallback: u64| {
            text(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(fallback)
        };

        let store_backend = match text("RDV_STORE_BACKEND").as_deref() {
            Some("sqlite") => StoreBackend::Sqlite,
            _ => StoreBackend::Memory,
        };
        let oauth = match (
            text("OAUTH_AUTHORIZE_URL"),
            text("OAUTH_TOKEN_URL"),
            text("OAUTH_USERINFO_URL"),
            text("OAUTH_CLIENT_ID"),
            text("OAUTH_REDIRECT_URI"),
        ) {
            (
                Some(authorize_url),
                Some(token_url),
                Some(userinfo_url),
                Some(client_id),
                Some(redirect_uri),
            ) => Some(OAuthSettings {
                authorize_url,
                token_url,
                userinfo_url,
                client_id,
                client_secret: text("OAUTH_CLIENT_SECRET").unwrap_or_default(),
                redirect_uri,
                scope: text("OAUTH_SCOPE").unwrap_or_else(|| DEFAULT_OAUTH_SCOPE.to_string()),
            }),
            _ => None,
        };
        let cookie_secure = match text("RDV_COOKIE_SECURE")
            .map(|raw| raw.to_ascii_lowercase())
            .as_deref()
        {
            Some("0" | "false" | "no" | "n" | "off") => false,
            _ => true,
        };

        Self {
            addr: text("RDV_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            qr_encryption_key: text("QR_ENCRYPTION_KEY"),
            session_secret: text("SESSION_SECRET").or_else(|| text("JWT_SECRET")),
            session_ttl_sec: number("SESSION_TTL_SEC", DEFAULT_SESSION_TTL_SEC),
            qr_ttl_ms: number("QR_TTL_MS", DEFAULT_QR_TTL_MS),
            oauth_ttl_ms: number("OAUTH_STATE_TTL_MS", DEFAULT_OAUTH_TTL_MS),
            reaper_interval: Duration::from_secs(number(
                "REAPER_INTERVAL_SEC",
                DEFAULT_REAPER_INTERVAL_SEC,
            )),
            ws_max_subscribers: usize::try_from(number(
                "WS_MAX_SUBSCRIBERS",
                DEFAULT_WS_MAX_SUBSCRIBERS as u64,
            ))
            .unwrap_or(DEFAULT_WS_MAX_SUBSCRIBERS),
            store_backend,
            sqlite_url: text("RDV_SQLITE_URL").unwrap_or_else(|| DEFAULT_SQLITE_URL.to_string()),
            oauth,
            cookie_secure,
            seed_users: text("RDV_SEED_USERS").unwrap_or_default(),
        }
    }

    pub(crate) fn validate(&self) -> Validation {
        let mut report = Validation::default();
        if self.session_secret.is_none() {
            report
                .errors
                .push("SESSION_SECRET (or JWT_SECRET) is required".to_string());
        }
        if self.qr_encryption_key.is_none() {
            report
                .warnings
                .push("QR_ENCRYPTION_KEY is empty; qr login is disabled".to_string());
        }
        if self.oauth.is_none() {
            report
                .warnings
                .push("OAUTH_* endpoints are incomplete; oauth login is disabled".to_string());
        }
        if let Some(oauth) = &self.oauth
            && oauth.client_secret.is_empty()
        {
            report
                .warnings
                .push("OAUTH_CLIENT_SECRET is empty".to_string());
        }
        if self.addr.parse::<std::net::SocketAddr>().is_err() {
            report
                .errors
                .push(format!("RDV_ADDR is not a socket address: {}", self.addr));
        }
        report
    }

    pub(crate) fn redacted(&self) -> RedactedConfig {
        let presence = |value: &Option<String>| if value.is_some() { "set" } else { "missing" };
        RedactedConfig {
            addr: self.addr.clone(),
            qr_encryption_key: presence(&self.qr_encryption_key),
            session_secret: presence(&self.session_secret),
            session_ttl_sec: self.session_ttl_sec,
            qr_ttl_ms: self.qr_ttl_ms,
            oauth_ttl_ms: self.oauth_ttl_ms,
            reaper_interval_sec: self.reaper_interval.as_secs(),
            ws_max_subscribers: self.ws_max_subscribers,
            store_backend: self.store_backend,
            sqlite_url: self.sqlite_url.clone(),
            oauth_configured: self.oauth.is_some(),
            oauth_client_id: self
                .oauth
                .as_ref()
                .map(|oauth| oauth.client_id.clone())
                .unwrap_or_default(),
            cookie_secure: self.cookie_secure,
            seed_users: self.seed_users.split(',').filter(|s| !s.trim().is_empty()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, StoreBackend};

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = config(&[]);
        assert_eq!(cfg.addr, "0.0.0.0:18080");
        assert_eq!(cfg.qr_ttl_ms, 180_000);
        assert_eq!(cfg.oauth_ttl_ms, 600_000);
        assert_eq!(cfg.session_ttl_sec, 5_184_000);
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert!(cfg.cookie_secure);
        assert!(cfg.oauth.is_none());

        let report = cfg.validate();
        assert!(!report.is_ok());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn jwt_secret_is_a_fallback_and_bad_numbers_fall_back() {
        let cfg = config(&[
            ("JWT_SECRET", "legacy"),
            ("QR_TTL_MS", "soon"),
            ("WS_MAX_SUBSCRIBERS", "0"),
            ("RDV_COOKIE_SECURE", "off"),
            ("RDV_STORE_BACKEND", "sqlite"),
        ]);
        assert_eq!(cfg.session_secret.as_deref(), Some("legacy"));
        assert_eq!(cfg.qr_ttl_ms, 180_000);
        assert_eq!(cfg.ws_max_subscribers, 1000);
        assert!(!cfg.cookie_secure);
        assert_eq!(cfg.store_backend, StoreBackend::Sqlite);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oauth_requires_every_endpoint() {
        let partial = config(&[
            ("OAUTH_AUTHORIZE_URL", "https://idp/authorize"),
            ("OAUTH_CLIENT_ID", "cid"),
        ]);
        assert!(partial.oauth.is_none());

        let full = config(&[
            ("OAUTH_AUTHORIZE_URL", "https://idp/authorize"),
            ("OAUTH_TOKEN_URL", "https://idp/token"),
            ("OAUTH_USERINFO_URL", "https://idp/me"),
            ("OAUTH_CLIENT_ID", "cid"),
            ("OAUTH_CLIENT_SECRET", "shh"),
            ("OAUTH_REDIRECT_URI", "https://app/cb"),
        ]);
        let oauth = full.oauth.expect("oauth settings");
        assert_eq!(oauth.scope, "openid profile email");
    }

    #[test]
    fn redacted_view_never_contains_secrets() {
        let cfg = config(&[
            ("SESSION_SECRET", "super-secret-session"),
            ("QR_ENCRYPTION_KEY", "super-secret-qr"),
            ("RDV_SEED_USERS", "1:alice,2:bob"),
        ]);
        let rendered = serde_json::to_string(&cfg.redacted()).expect("json");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("\"sessionSecret\":\"set\""));
        assert!(rendered.contains("\"seedUsers\":2"));
    }
}

//! 外部身份提供方：授权地址拼装与授权码换取身份。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::users::ExternalIdentity;

/// 提供方 HTTP 超时。
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub(crate) enum IdentityError {
    #[error("authorization code exchange failed: {0}")]
    TokenExchange(String),
    #[error("user profile request failed: {0}")]
    Profile(String),
    #[error("user profile is missing `{0}`")]
    Incomplete(&'static str),
}

/// 授权码 → 外部身份。
#[async_trait]
pub(crate) trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, IdentityError>;
}

/// 授权端点配置。
#[derive(Debug, Clone)]
pub(crate) struct AuthorizeEndpoint {
    pub(crate) authorize_url: String,
    pub(crate) client_id: String,
    pub(crate) redirect_uri: String,
    pub(crate) scope: String,
}

impl AuthorizeEndpoint {
    /// 拼装跳转地址（`response_type=code`）。
    pub(crate) fn url_for(&self, state: &str) -> Result<String, url::ParseError> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", self.scope.as_str()),
                ("state", state),
            ],
        )?;
        Ok(url.into())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 标准授权码流程：token 端点换 access token，再读取用户资料。
pub(crate) struct HttpIdentityProvider {
    http: reqwest::Client,
    token_url: String,
    userinfo_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl HttpIdentityProvider {
    pub(crate) fn new(
        token_url: String,
        userinfo_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token_url,
            userinfo_url,
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, IdentityError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|err| IdentityError::TokenExchange(err.to_string()))?;
        let status = resp.status();
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|err| IdentityError::TokenExchange(err.to_string()))?;
        if let Some(error) = token.error {
            warn!(%status, error, "identity provider rejected code");
            return Err(IdentityError::TokenExchange(error));
        }
        let access_token = token
            .access_token
            .filter(|token| status.is_success() && !token.is_empty())
            .ok_or_else(|| IdentityError::TokenExchange(format!("status {status}")))?;

        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| IdentityError::Profile(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(IdentityError::Profile(format!("status {}", resp.status())));
        }
        let profile: Value = resp
            .json()
            .await
            .map_err(|err| IdentityError::Profile(err.to_string()))?;
        identity_from_profile(&profile)
    }
}

fn first_str<'a>(profile: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| profile.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// 从用户资料 JSON 提取外部身份；兼容 OIDC（sub/name/email/picture）与 Graph（id/displayName/mail/userPrincipalName）。
pub(crate) fn identity_from_profile(profile: &Value) -> Result<ExternalIdentity, IdentityError> {
    let provider_id = first_str(profile, &["id", "sub"]).ok_or(IdentityError::Incomplete("id"))?;
    let email = first_str(profile, &["mail", "email", "userPrincipalName"])
        .filter(|email| email.contains('@'))
        .map(str::to_ascii_lowercase);
    let display_name = first_str(profile, &["displayName", "name"])
        .map(str::to_string)
        .or_else(|| email.clone())
        .unwrap_or_else(|| provider_id.to_string());
    Ok(ExternalIdentity {
        provider_id: provider_id.to_string(),
        display_name,
        avatar_url: first_str(profile, &["picture", "avatarUrl"]).map(str::to_string),
        email,
    })
}

/// 测试用提供方：按授权码返回预置身份。
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticIdentityProvider {
    identities: std::sync::Mutex<std::collections::HashMap<String, ExternalIdentity>>,
}

#[cfg(test)]
impl StaticIdentityProvider {
    pub(crate) fn with(self, code: &str, identity: ExternalIdentity) -> Self {
        self.identities
            .lock()
            .expect("identities lock")
            .insert(code.to_string(), identity);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, IdentityError> {
        self.identities
            .lock()
            .expect("identities lock")
            .get(code)
            .cloned()
            .ok_or_else(|| IdentityError::TokenExchange("invalid_grant".to_string()))
    }
}

//! 服务状态：按配置装配各会合存储、通知中心与业务服务。

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use axum::http::HeaderValue;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    api::types::DebugStatsData,
    auth::{
        cookie::session_set_cookie,
        session::{HmacSessionIssuer, SessionIssuer},
        token_codec::TokenCodec,
    },
    clock::SharedClock,
    config::{Config, StoreBackend},
    notify::NotificationHub,
    oauth::{
        OAuthService,
        provider::{AuthorizeEndpoint, HttpIdentityProvider},
    },
    qr_login::QrLoginService,
    rendezvous::{
        RendezvousStore, Staged,
        memory::MemoryRendezvousStore,
        reaper::{Reaper, Sweepable},
        sqlite::{SqliteRendezvousStore, connect_pool},
    },
    users::{MemoryUserStore, parse_seed_users},
};

/// 服务共享状态。
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) qr: Arc<QrLoginService>,
    pub(crate) oauth: Arc<OAuthService>,
    pub(crate) hub: Arc<NotificationHub>,
    pub(crate) sessions: Arc<dyn SessionIssuer>,
    /// 会话 cookie 是否带 `Secure`。
    pub(crate) cookie_secure: bool,
    /// 交给清理任务的目标。
    sweepers: Arc<Vec<Arc<dyn Sweepable>>>,
}

/// 一个会合存储实例及其清理入口。
type StoreParts<P> = (Arc<dyn RendezvousStore<P>>, Arc<dyn Sweepable>);

async fn build_store<P: Staged>(
    pool: Option<&SqlitePool>,
    clock: &SharedClock,
) -> anyhow::Result<StoreParts<P>> {
    match pool {
        Some(pool) => {
            let store = Arc::new(
                SqliteRendezvousStore::<P>::with_pool(pool.clone(), clock.clone())
                    .await
                    .with_context(|| format!("prepare sqlite store for {}", P::KIND))?,
            );
            let sweeper: Arc<dyn Sweepable> = store.clone();
            let store: Arc<dyn RendezvousStore<P>> = store;
            Ok((store, sweeper))
        }
        None => {
            let store = Arc::new(MemoryRendezvousStore::<P>::new(clock.clone()));
            let sweeper: Arc<dyn Sweepable> = store.clone();
            let store: Arc<dyn RendezvousStore<P>> = store;
            Ok((store, sweeper))
        }
    }
}

impl AppState {
    /// 按配置装配。缺少会话密钥时失败；缺少二维码密钥或 OAuth 配置时对应功能关闭。
    pub(crate) async fn from_config(config: &Config, clock: SharedClock) -> anyhow::Result<Self> {
        let Some(session_secret) = config.session_secret.as_deref() else {
            bail!("SESSION_SECRET is required");
        };
        let sessions: Arc<dyn SessionIssuer> = Arc::new(HmacSessionIssuer::new(
            session_secret,
            config.session_ttl_sec,
            clock.clone(),
        ));

        let seeds = parse_seed_users(&config.seed_users);
        let users = Arc::new(MemoryUserStore::new());
        for user in seeds {
            users.insert(user).await;
        }
        info!(users = users.count().await, "user store seeded");

        let pool = match config.store_backend {
            StoreBackend::Memory => None,
            StoreBackend::Sqlite => Some(
                connect_pool(&config.sqlite_url)
                    .await
                    .with_context(|| format!("connect sqlite: {}", config.sqlite_url))?,
            ),
        };
        let (qr_store, qr_sweeper) = build_store(pool.as_ref(), &clock).await?;
        let (state_store, state_sweeper) = build_store(pool.as_ref(), &clock).await?;
        let (link_store, link_sweeper) = build_store(pool.as_ref(), &clock).await?;

        let codec = match config.qr_encryption_key.as_deref() {
            Some(key) => Some(TokenCodec::new(key).context("derive qr token key")?),
            None => {
                warn!("QR_ENCRYPTION_KEY is empty; qr login disabled");
                None
            }
        };
        let hub = Arc::new(NotificationHub::new(config.ws_max_subscribers));
        let qr = Arc::new(QrLoginService::new(
            qr_store,
            codec,
            hub.clone(),
            sessions.clone(),
            users.clone(),
            clock.clone(),
            config.qr_ttl_ms,
        ));

        let mut oauth = OAuthService::new(
            state_store,
            link_store,
            sessions.clone(),
            users,
            config.oauth_ttl_ms,
        );
        match &config.oauth {
            Some(settings) => {
                let provider = HttpIdentityProvider::new(
                    settings.token_url.clone(),
                    settings.userinfo_url.clone(),
                    settings.client_id.clone(),
                    settings.client_secret.clone(),
                    settings.redirect_uri.clone(),
                )
                .context("build identity provider client")?;
                let endpoint = AuthorizeEndpoint {
                    authorize_url: settings.authorize_url.clone(),
                    client_id: settings.client_id.clone(),
                    redirect_uri: settings.redirect_uri.clone(),
                    scope: settings.scope.clone(),
                };
                oauth = oauth.with_provider(endpoint, Arc::new(provider));
            }
            None => warn!("oauth endpoints incomplete; oauth login disabled"),
        }

        let hub_sweeper: Arc<dyn Sweepable> = hub.clone();
        Ok(Self {
            qr,
            oauth: Arc::new(oauth),
            hub,
            sessions,
            cookie_secure: config.cookie_secure,
            sweepers: Arc::new(vec![qr_sweeper, state_sweeper, link_sweeper, hub_sweeper]),
        })
    }

    /// 会话 cookie；Max-Age 与会话有效期一致。
    pub(crate) fn session_cookie(&self, token: &str) -> Option<HeaderValue> {
        session_set_cookie(token, self.sessions.ttl_sec(), self.cookie_secure)
    }

    /// 覆盖全部存储与通知主题的清理任务。
    pub(crate) fn reaper(&self, period: Duration) -> Reaper {
        self.sweepers
            .iter()
            .cloned()
            .fold(Reaper::new(period), Reaper::with_target)
    }

    pub(crate) async fn stats(&self) -> DebugStatsData {
        let (oauth_states, pending_links) = self.oauth.pending_counts().await;
        let hub = self.hub.stats().await;
        DebugStatsData {
            qr_configured: self.qr.is_configured(),
            oauth_configured: self.oauth.is_configured(),
            qr_sessions: self.qr.active_sessions().await,
            oauth_states,
            pending_links,
            notify_topics: hub.topics,
            notify_subscribers: hub.subscribers,
            server_time: rdv_shared_protocol::now_rfc3339_nanos(),
        }
    }
}

//! 应用装配：路由、CORS、后台清理与监听。

use anyhow::{Context, bail};
use axum::{
    Json, Router,
    extract::State,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{
    api::types::DebugStatsData,
    clock::system_clock,
    config::Config,
    oauth::{
        confirm_link_handler, oauth_begin_handler, oauth_callback_handler, pending_link_handler,
    },
    qr_login::handlers::{
        qr_cancel_handler, qr_generate_handler, qr_mobile_cancel_handler,
        qr_mobile_confirm_handler, qr_scan_handler, qr_set_session_handler, qr_status_handler,
        qr_wait_handler,
    },
    state::AppState,
    ws::handlers::qr_login_ws_handler,
};

/// 服务入口：校验配置、装配状态、启动清理任务并监听直到收到退出信号。
pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    let report = config.validate();
    for warning in &report.warnings {
        warn!("config: {warning}");
    }
    if !report.is_ok() {
        bail!("invalid configuration: {}", report.errors.join("; "));
    }

    let state = AppState::from_config(&config, system_clock()).await?;
    let reaper = state.reaper(config.reaper_interval).spawn();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    info!("rdv-auth listening on {}", config.addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    reaper.abort();
    served?;
    info!("rdv-auth stopped");
    Ok(())
}

/// 全部路由。
pub(crate) fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/debug/stats", get(debug_stats))
        .route("/api/qr-login/generate", post(qr_generate_handler))
        .route("/api/qr-login/scan", post(qr_scan_handler))
        .route("/api/qr-login/mobile-confirm", post(qr_mobile_confirm_handler))
        .route("/api/qr-login/cancel", post(qr_cancel_handler))
        .route("/api/qr-login/mobile-cancel", post(qr_mobile_cancel_handler))
        .route("/api/qr-login/set-session", post(qr_set_session_handler))
        .route("/api/qr-login/status", get(qr_status_handler))
        .route("/api/qr-login/wait", get(qr_wait_handler))
        .route("/ws/qr-login", get(qr_login_ws_handler))
        .route("/api/oauth/begin", post(oauth_begin_handler))
        .route("/api/oauth/callback", get(oauth_callback_handler))
        .route("/api/auth/pending-link", get(pending_link_handler))
        .route("/api/auth/confirm-link", post(confirm_link_handler))
        .layer(cors)
        .with_state(state)
}

/// 健康检查接口。
async fn healthz() -> &'static str {
    "ok"
}

/// 调试接口：各存储条目数与订阅数。
async fn debug_stats(State(state): State<AppState>) -> Json<DebugStatsData> {
    Json(state.stats().await)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("listen for ctrl-c failed: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

//! WebSocket 握手与推送循环：桌面端在此等待扫码/确认结果。

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use rdv_shared_protocol::QrStatusMessage;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::{
    api::{
        error::ApiError,
        response::ApiReply,
        types::{TokenQuery, WS_MAX_LIFETIME_SEC, WS_PING_INTERVAL_SEC},
    },
    qr_login::handlers::{QrWatch, watch_error},
    state::AppState,
};

/// WS 握手入口：升级前完成令牌校验与订阅，失败时按普通 HTTP 错误返回。
pub(crate) async fn qr_login_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiReply<()>> {
    if q.token.trim().is_empty() {
        return Err(ApiError::missing_token().into_response());
    }
    let watch = state
        .qr
        .watch(&q.token)
        .await
        .map_err(|err| watch_error(err).into_response())?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, watch)))
}

/// 单连接处理：先推送快照，再转发状态变化直到终态、断开或超时。
async fn handle_socket(socket: WebSocket, mut watch: QrWatch) {
    let (mut ws_sender, mut ws_reader) = socket.split();
    let mut known = watch.current.status;
    info!(status = known.as_str(), "qr ws connected");

    if send_status(&mut ws_sender, &watch.current).await.is_err() || known.is_terminal() {
        let _ = ws_sender.close().await;
        return;
    }

    let ping_period = Duration::from_secs(WS_PING_INTERVAL_SEC);
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    let lifetime = sleep(Duration::from_secs(WS_MAX_LIFETIME_SEC));
    tokio::pin!(lifetime);

    loop {
        tokio::select! {
            event = watch.next_change(known) => {
                let Some(message) = event else {
                    debug!("qr ws topic closed");
                    break;
                };
                known = message.status;
                if send_status(&mut ws_sender, &message).await.is_err() {
                    warn!(status = known.as_str(), "qr ws push failed");
                    break;
                }
                if known.is_terminal() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            incoming = ws_reader.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = &mut lifetime => {
                debug!("qr ws lifetime reached");
                break;
            }
        }
    }

    let _ = ws_sender.close().await;
    info!(status = known.as_str(), "qr ws disconnected");
}

async fn send_status(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    message: &QrStatusMessage,
) -> Result<(), axum::Error> {
    let raw = match serde_json::to_string(message) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "qr ws encode failed");
            return Ok(());
        }
    };
    ws_sender.send(Message::Text(raw.into())).await
}

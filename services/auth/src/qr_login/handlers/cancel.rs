//! 取消：任一端、任一非终态均可，结果恒为成功。只有真正删掉存活条目时才通知桌面端。

use rdv_shared_protocol::{QrStatus, QrStatusMessage};
use tracing::{debug, info, warn};

use crate::qr_login::QrLoginService;

/// 取消发起方，仅用于日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOrigin {
    Desktop,
    Mobile,
}

impl CancelOrigin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl QrLoginService {
    /// 删除句柄并通知桌面端。不返回错误，避免探测句柄是否存在。
    pub(crate) async fn cancel(&self, token: &str, origin: CancelOrigin) {
        let handle = match self.resolve(token) {
            Ok(handle) => handle,
            Err(err) => {
                debug!(origin = origin.as_str(), error = %err, "qr cancel ignored");
                return;
            }
        };

        match self.store.delete(&handle).await {
            Ok(true) => {
                info!(
                    handle = handle.fingerprint(),
                    origin = origin.as_str(),
                    "qr session cancelled"
                );
                self.hub
                    .publish(&handle, QrStatusMessage::status(QrStatus::Cancelled))
                    .await;
            }
            // 句柄已不存在：可能是确认正在签发会话，不能抢先关闭桌面端的主题。
            Ok(false) => debug!(
                handle = handle.fingerprint(),
                origin = origin.as_str(),
                "qr cancel on absent session"
            ),
            Err(err) => warn!(
                handle = handle.fingerprint(),
                origin = origin.as_str(),
                error = %err,
                "qr cancel delete failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use rdv_shared_protocol::QrStatus;
    use tokio::sync::Notify;

    use super::CancelOrigin;
    use crate::{
        auth::{
            session::{HmacSessionIssuer, SessionClaims, SessionError, SessionIssuer},
            token_codec::TokenCodec,
        },
        clock::ManualClock,
        notify::NotificationHub,
        qr_login::{
            QrLoginError, QrLoginService, QrSession,
            testing::{DESKTOP_UA, TEST_TTL_MS, fixture},
        },
        rendezvous::{RendezvousStore, memory::MemoryRendezvousStore},
        users::{MemoryUserStore, test_user},
    };

    /// 签发会话时停住，直到测试放行。
    struct GatedIssuer {
        inner: HmacSessionIssuer,
        minting: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SessionIssuer for GatedIssuer {
        async fn issue(&self, user_id: i64) -> Result<String, SessionError> {
            self.minting.notify_one();
            self.release.notified().await;
            self.inner.issue(user_id).await
        }

        async fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
            self.inner.verify(token).await
        }

        fn ttl_sec(&self) -> u64 {
            self.inner.ttl_sec()
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_from_any_live_state() {
        let fx = fixture().await;
        let pending = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        let scanned = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        fx.service.scan(&scanned.token).await.expect("scan");

        for token in [&pending.token, &scanned.token] {
            fx.service.cancel(token, CancelOrigin::Desktop).await;
            fx.service.cancel(token, CancelOrigin::Mobile).await;
            assert!(matches!(
                fx.service.status(token).await,
                Err(QrLoginError::NotFound)
            ));
        }
        fx.service.cancel("garbage", CancelOrigin::Mobile).await;
    }

    #[tokio::test]
    async fn cancel_wakes_the_desktop_and_blocks_later_transitions() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        let handle = fx.service.resolve(&issued.token).expect("resolve");
        let mut desktop = fx.hub.subscribe(&handle).await.expect("subscribe");

        fx.service.cancel(&issued.token, CancelOrigin::Mobile).await;
        assert_eq!(
            desktop.recv().await.map(|m| m.status),
            Some(QrStatus::Cancelled)
        );
        assert!(matches!(
            fx.service.scan(&issued.token).await,
            Err(QrLoginError::NotFound)
        ));
    }

    #[tokio::test]
    async fn cancel_while_confirm_mints_does_not_steal_the_desktop_result() {
        let clock = ManualClock::at(0);
        let hub = Arc::new(NotificationHub::new(8));
        let users = Arc::new(MemoryUserStore::new());
        users.insert(test_user(7, "phone@example.com")).await;
        let gate = Arc::new(GatedIssuer {
            inner: HmacSessionIssuer::new("session-secret", 3_600, clock.clone()),
            minting: Notify::new(),
            release: Notify::new(),
        });
        let store: Arc<dyn RendezvousStore<QrSession>> =
            Arc::new(MemoryRendezvousStore::new(clock.clone()));
        let service = Arc::new(QrLoginService::new(
            store,
            Some(TokenCodec::new("qr-secret").expect("codec")),
            hub.clone(),
            gate.clone(),
            users,
            clock.clone(),
            TEST_TTL_MS,
        ));

        let issued = service.issue("ip", DESKTOP_UA).await.expect("issue");
        let handle = service.resolve(&issued.token).expect("resolve");
        let mut desktop = hub.subscribe(&handle).await.expect("subscribe");
        service.scan(&issued.token).await.expect("scan");
        let phone = gate.inner.issue(7).await.expect("phone session");

        let confirming = {
            let service = service.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { service.confirm(&token, Some(&phone)).await })
        };
        gate.minting.notified().await;
        service.cancel(&issued.token, CancelOrigin::Mobile).await;
        gate.release.notify_one();
        confirming.await.expect("join").expect("confirm");

        let first = desktop.recv().await.expect("scanned");
        assert_eq!(first.status, QrStatus::Scanned);
        let second = tokio::time::timeout(Duration::from_secs(5), desktop.recv())
            .await
            .expect("desktop result in time")
            .expect("confirmed");
        assert_eq!(second.status, QrStatus::Confirmed);
        assert!(second.session_token.is_some());
    }
}

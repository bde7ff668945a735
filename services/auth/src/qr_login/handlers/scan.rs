//! 移动端扫码：`pending → scanned`。

use rdv_shared_protocol::{QrStatus, QrStatusMessage};
use tracing::info;

use super::from_store;
use crate::{
    api::types::QrScanData,
    qr_login::{QrLoginError, QrLoginService, describe_desktop},
};

impl QrLoginService {
    /// 扫码并通知桌面端；返回桌面端信息供移动端确认。
    pub(crate) async fn scan(&self, token: &str) -> Result<QrScanData, QrLoginError> {
        let opened = self.open_token(token)?;
        let handle = opened.handle;
        let before = self
            .store
            .take_if_status(&handle, QrStatus::Pending, QrStatus::Scanned)
            .await
            .map_err(from_store)?;

        self.hub
            .publish(&handle, QrStatusMessage::status(QrStatus::Scanned))
            .await;

        let desktop_info = describe_desktop(
            &before.payload.desktop_ip,
            &before.payload.desktop_user_agent,
        );
        info!(
            handle = handle.fingerprint(),
            browser = %desktop_info.browser,
            os = %desktop_info.os,
            token_age_ms = self.clock.now_ms().saturating_sub(opened.issued_at_ms),
            "qr session scanned"
        );
        Ok(QrScanData {
            desktop_info,
            expire_time: before.expire_at_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rdv_shared_protocol::QrStatus;

    use crate::{
        qr_login::{
            QrLoginError,
            testing::{DESKTOP_UA, fixture},
        },
        rendezvous::Handle,
    };

    #[tokio::test]
    async fn scan_discloses_desktop_and_wakes_subscriber() {
        let fx = fixture().await;
        let issued = fx.service.issue("10.0.0.8", DESKTOP_UA).await.expect("issue");
        let handle = fx.service.resolve(&issued.token).expect("resolve");
        let mut sub = fx.hub.subscribe(&handle).await.expect("subscribe");

        let scanned = fx.service.scan(&issued.token).await.expect("scan");
        assert_eq!(scanned.desktop_info.ip, "10.0.0.8");
        assert_eq!(scanned.desktop_info.browser, "Chrome");
        assert_eq!(scanned.desktop_info.os, "Windows 10/11");

        let event = sub.recv().await.expect("event");
        assert_eq!(event.status, QrStatus::Scanned);
        assert_eq!(event.session_token, None);
    }

    #[tokio::test]
    async fn scanning_twice_is_a_conflict() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        fx.service.scan(&issued.token).await.expect("first scan");
        assert!(matches!(
            fx.service.scan(&issued.token).await,
            Err(QrLoginError::Conflict { ref current }) if current == "scanned"
        ));
    }

    #[tokio::test]
    async fn scan_records_when_it_happened() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        fx.clock.set(60_000);
        fx.service.scan(&issued.token).await.expect("scan");
        let status = fx.service.status(&issued.token).await.expect("status");
        assert_eq!(status.status, QrStatus::Scanned);
        assert_eq!(status.scanned_at, Some(60_000));
    }

    #[tokio::test]
    async fn opened_token_carries_issue_time() {
        let fx = fixture().await;
        fx.clock.set(5_000);
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        let opened = fx.service.open_token(&issued.token).expect("open");
        assert_eq!(opened.issued_at_ms, 5_000);
        assert_eq!(opened.handle, fx.service.resolve(&issued.token).expect("resolve"));
        assert!(matches!(
            fx.service.open_token("  "),
            Err(QrLoginError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn forged_token_for_unknown_handle_is_not_found() {
        let fx = fixture().await;
        let codec = crate::auth::token_codec::TokenCodec::new("qr-secret").expect("codec");
        let forged = codec.wrap(&Handle::generate(32), 0).expect("wrap");
        assert!(matches!(
            fx.service.scan(&forged).await,
            Err(QrLoginError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scans_have_exactly_one_winner() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");

        let first = {
            let service = fx.service.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { service.scan(&token).await })
        };
        let second = {
            let service = fx.service.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { service.scan(&token).await })
        };
        let outcomes = [first.await.expect("join"), second.await.expect("join")];

        let wins = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| matches!(r, Err(QrLoginError::Conflict { .. })))
            .count();
        assert_eq!((wins, conflicts), (1, 1));
    }
}

//! 移动端确认：`scanned → confirmed`，为桌面端签发会话并推送。

use rdv_shared_protocol::{QrStatus, QrStatusMessage};
use tracing::{error, info, warn};

use super::from_store;
use crate::{
    auth::{AuthenticateError, authenticate},
    qr_login::{QrLoginError, QrLoginService},
};

impl QrLoginService {
    /// 确认登录。`phone_session` 是移动端自身的会话令牌。
    ///
    /// 确认是终态：句柄在迁移时即被删除，会话签发失败也不会恢复。
    pub(crate) async fn confirm(
        &self,
        token: &str,
        phone_session: Option<&str>,
    ) -> Result<(), QrLoginError> {
        let user_id = self.authenticate_phone(phone_session).await?;
        let handle = self.resolve(token)?;

        self.store
            .take_if_status(&handle, QrStatus::Scanned, QrStatus::Confirmed)
            .await
            .map_err(from_store)?;

        let desktop_session = match self.sessions.issue(user_id).await {
            Ok(session) => session,
            Err(err) => {
                error!(
                    handle = handle.fingerprint(),
                    user_id,
                    error = %err,
                    "desktop session mint failed after confirm"
                );
                // 句柄已消费，让桌面端结束等待并重新发起。
                self.hub
                    .publish(&handle, QrStatusMessage::status(QrStatus::Cancelled))
                    .await;
                return Err(QrLoginError::SessionMint(err.to_string()));
            }
        };

        let delivered = self
            .hub
            .publish(&handle, QrStatusMessage::confirmed(desktop_session))
            .await;
        if delivered == 0 {
            warn!(
                handle = handle.fingerprint(),
                "confirmed event had no desktop subscriber"
            );
        }
        info!(handle = handle.fingerprint(), user_id, "qr session confirmed");
        Ok(())
    }

    /// 校验移动端会话，返回用户 id。
    async fn authenticate_phone(&self, phone_session: Option<&str>) -> Result<i64, QrLoginError> {
        authenticate(self.sessions.as_ref(), self.users.as_ref(), phone_session)
            .await
            .map_err(|err| match err {
                AuthenticateError::Rejected(failure) => QrLoginError::Unauthorized(failure),
                AuthenticateError::Backend(message) => QrLoginError::Internal(message),
            })
    }
}

#[cfg(test)]
mod tests {
    use rdv_shared_protocol::QrStatus;

    use crate::{
        auth::session::SessionIssuer,
        qr_login::{
            AuthFailure, QrLoginError,
            testing::{DESKTOP_UA, fixture},
        },
    };

    #[tokio::test]
    async fn issue_scan_confirm_delivers_session_exactly_once() {
        let fx = fixture().await;
        let issued = fx.service.issue("10.0.0.8", DESKTOP_UA).await.expect("issue");
        let handle = fx.service.resolve(&issued.token).expect("resolve");
        let mut desktop = fx.hub.subscribe(&handle).await.expect("subscribe");
        let phone = fx.phone_session().await;

        fx.clock.set(60_000);
        fx.service.scan(&issued.token).await.expect("scan");
        fx.clock.set(120_000);
        fx.service
            .confirm(&issued.token, Some(&phone))
            .await
            .expect("confirm");

        assert_eq!(desktop.recv().await.map(|m| m.status), Some(QrStatus::Scanned));
        let confirmed = desktop.recv().await.expect("confirmed event");
        assert_eq!(confirmed.status, QrStatus::Confirmed);
        let session = confirmed.session_token.expect("session token");
        assert_eq!(fx.issuer.verify(&session).await.expect("valid").uid, 7);
        assert!(desktop.recv().await.is_none());

        assert!(matches!(
            fx.service.status(&issued.token).await,
            Err(QrLoginError::NotFound)
        ));
        assert!(matches!(
            fx.service.confirm(&issued.token, Some(&phone)).await,
            Err(QrLoginError::NotFound)
        ));
    }

    #[tokio::test]
    async fn confirm_without_scan_is_rejected() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        let phone = fx.phone_session().await;
        assert!(matches!(
            fx.service.confirm(&issued.token, Some(&phone)).await,
            Err(QrLoginError::Conflict { ref current }) if current == "pending"
        ));
        assert_eq!(
            fx.service.status(&issued.token).await.expect("still there").status,
            QrStatus::Pending
        );
    }

    #[tokio::test]
    async fn expired_session_cannot_be_confirmed_late() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        let phone = fx.phone_session().await;
        fx.service.scan(&issued.token).await.expect("scan");

        fx.clock.set(200_000);
        assert!(matches!(
            fx.service.status(&issued.token).await,
            Err(QrLoginError::NotFound)
        ));
        assert!(matches!(
            fx.service.confirm(&issued.token, Some(&phone)).await,
            Err(QrLoginError::NotFound)
        ));
    }

    #[tokio::test]
    async fn confirm_requires_a_valid_phone_session_for_an_existing_user() {
        let fx = fixture().await;
        let issued = fx.service.issue("ip", DESKTOP_UA).await.expect("issue");
        fx.service.scan(&issued.token).await.expect("scan");

        assert!(matches!(
            fx.service.confirm(&issued.token, None).await,
            Err(QrLoginError::Unauthorized(AuthFailure::Missing))
        ));
        assert!(matches!(
            fx.service.confirm(&issued.token, Some("yst_v1.bad.sig")).await,
            Err(QrLoginError::Unauthorized(AuthFailure::Invalid))
        ));

        let phone = fx.phone_session().await;
        fx.users.remove(7).await;
        assert!(matches!(
            fx.service.confirm(&issued.token, Some(&phone)).await,
            Err(QrLoginError::Unauthorized(AuthFailure::Invalid))
        ));

        // 鉴权失败不消耗句柄。
        assert_eq!(
            fx.service.status(&issued.token).await.expect("status").status,
            QrStatus::Scanned
        );
    }
}

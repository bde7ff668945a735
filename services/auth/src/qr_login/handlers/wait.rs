//! 桌面端等待：先订阅再读快照，避免漏掉两者之间发生的迁移。

use std::time::Duration;

use rdv_shared_protocol::{QrStatus, QrStatusMessage};

use super::from_store;
use crate::{
    notify::Subscription,
    qr_login::{QrLoginError, QrLoginService},
    rendezvous::StoreError,
};

/// 一次等待：订阅加订阅时刻的状态。
pub(crate) struct QrWatch {
    pub(crate) subscription: Subscription,
    pub(crate) current: QrStatusMessage,
}

impl QrWatch {
    /// 等待与 `known` 不同的下一条消息；主题关闭返回 `None`。
    pub(crate) async fn next_change(&mut self, known: QrStatus) -> Option<QrStatusMessage> {
        while let Some(message) = self.subscription.recv().await {
            if message.status != known {
                return Some(message);
            }
        }
        None
    }
}

impl QrLoginService {
    /// 订阅句柄主题并读取当前状态。
    pub(crate) async fn watch(&self, token: &str) -> Result<QrWatch, QrLoginError> {
        let handle = self.resolve(token)?;
        let mut subscription = self
            .hub
            .subscribe(&handle)
            .await
            .map_err(|_| QrLoginError::Busy)?;

        match self.store.get(&handle).await {
            Ok(entry) => Ok(QrWatch {
                subscription,
                current: QrStatusMessage::status(entry.payload.status),
            }),
            // 订阅后、读取前到达终态：终态消息已在缓冲里。
            Err(StoreError::NotFound) => match subscription.try_recv() {
                Some(message) if message.status.is_terminal() => Ok(QrWatch {
                    subscription,
                    current: message,
                }),
                _ => Err(QrLoginError::NotFound),
            },
            Err(err) => Err(from_store(err)),
        }
    }

    /// 长轮询：状态与 `known` 不同立即返回，否则最多等待 `timeout`；超时返回 `None`。
    pub(crate) async fn wait(
        &self,
        token: &str,
        known: Option<QrStatus>,
        timeout: Duration,
    ) -> Result<Option<QrStatusMessage>, QrLoginError> {
        let mut watch = self.watch(token).await?;
        let Some(known) = known else {
            return Ok(Some(watch.current));
        };
        if watch.current.status != known || watch.current.status.is_terminal() {
            return Ok(Some(watch.current));
        }
        match tokio::time::timeout(timeout, watch.next_change(known)).await {
            Err(_) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(QrLoginError::NotFound),
        }
    }
}

//! 通知桥：状态迁移发生在移动端请求上，唤醒等待中的桌面端连接。
//!
//! 发布是即发即弃的：没有订阅者时消息直接丢弃。终态消息发出后主题即被移除，
//! 因此桌面端若恰好在 confirmed 推送时断线，会话令牌不会再次下发。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use rdv_shared_protocol::QrStatusMessage;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::rendezvous::{Handle, StoreError, reaper::Sweepable};

/// 单主题缓冲容量；一个会话最多产生三条状态消息。
const TOPIC_CAPACITY: usize = 16;

/// 订阅错误。
#[derive(Debug, thiserror::Error)]
pub(crate) enum NotifyError {
    #[error("too many concurrent subscribers (limit {limit})")]
    TooManySubscribers { limit: usize },
}

/// 按句柄分主题的广播中心。
pub(crate) struct NotificationHub {
    topics: Mutex<HashMap<Handle, broadcast::Sender<QrStatusMessage>>>,
    active: Arc<AtomicUsize>,
    max_subscribers: usize,
}

/// 活跃订阅计数许可，随订阅释放。
struct SubscriberPermit(Arc<AtomicUsize>);

impl Drop for SubscriberPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 一个桌面端等待者持有的订阅。
pub(crate) struct Subscription {
    receiver: broadcast::Receiver<QrStatusMessage>,
    _permit: SubscriberPermit,
}

impl Subscription {
    /// 等待下一条消息；主题被移除且缓冲读空后返回 `None`。
    pub(crate) async fn recv(&mut self) -> Option<QrStatusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, skipping stale events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞读取已缓冲的消息。
    pub(crate) fn try_recv(&mut self) -> Option<QrStatusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// 通知中心统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HubStats {
    pub(crate) topics: usize,
    pub(crate) subscribers: usize,
}

impl NotificationHub {
    pub(crate) fn new(max_subscribers: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            active: Arc::new(AtomicUsize::new(0)),
            max_subscribers,
        }
    }

    /// 订阅句柄主题；超过并发上限时失败。
    pub(crate) async fn subscribe(&self, handle: &Handle) -> Result<Subscription, NotifyError> {
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.max_subscribers).then_some(current + 1)
            });
        if reserved.is_err() {
            return Err(NotifyError::TooManySubscribers {
                limit: self.max_subscribers,
            });
        }
        let permit = SubscriberPermit(self.active.clone());

        let mut topics = self.topics.lock().await;
        let sender = topics
            .entry(handle.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(Subscription {
            receiver: sender.subscribe(),
            _permit: permit,
        })
    }

    /// 发布消息，返回收到消息的订阅者数量。终态消息发出后移除主题。
    pub(crate) async fn publish(&self, handle: &Handle, message: QrStatusMessage) -> usize {
        let terminal = message.status.is_terminal();
        let mut topics = self.topics.lock().await;
        let delivered = topics
            .get(handle)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or_default();
        if terminal {
            topics.remove(handle);
        }
        debug!(
            handle = handle.fingerprint(),
            delivered, terminal, "notification published"
        );
        delivered
    }

    pub(crate) async fn stats(&self) -> HubStats {
        HubStats {
            topics: self.topics.lock().await.len(),
            subscribers: self.active.load(Ordering::SeqCst),
        }
    }

    /// 移除已没有接收者的主题，返回移除数量。
    pub(crate) async fn drop_idle_topics(&self) -> usize {
        let mut topics = self.topics.lock().await;
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }
}

#[async_trait]
impl Sweepable for NotificationHub {
    fn name(&self) -> &'static str {
        "notify_topics"
    }

    async fn sweep(&self) -> Result<usize, StoreError> {
        Ok(self.drop_idle_topics().await)
    }
}

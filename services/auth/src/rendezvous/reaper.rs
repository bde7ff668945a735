//! 后台清理任务：定时清理所有会合存储与通知主题。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use super::StoreError;

/// 可被清理任务定时调用的目标。
#[async_trait]
pub(crate) trait Sweepable: Send + Sync {
    /// 日志中的目标名称。
    fn name(&self) -> &'static str;
    /// 清理一次，返回清理数量；只能移除已超过 ttl 的条目。
    async fn sweep(&self) -> Result<usize, StoreError>;
}

/// 定时清理器。
pub(crate) struct Reaper {
    targets: Vec<Arc<dyn Sweepable>>,
    period: Duration,
}

impl Reaper {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            targets: Vec::new(),
            period,
        }
    }

    pub(crate) fn with_target(mut self, target: Arc<dyn Sweepable>) -> Self {
        self.targets.push(target);
        self
    }

    /// 依次清理所有目标；单个目标失败只记日志，不影响其余目标。
    pub(crate) async fn sweep_once(&self) -> usize {
        let mut total = 0;
        for target in &self.targets {
            match target.sweep().await {
                Ok(0) => debug!(target_name = target.name(), "reaper sweep found nothing"),
                Ok(removed) => {
                    total += removed;
                    info!(target_name = target.name(), removed, "reaper swept expired entries");
                }
                Err(err) => {
                    warn!(target_name = target.name(), error = %err, "reaper sweep failed");
                }
            }
        }
        total
    }

    /// 启动后台任务；首个 tick 立即触发，跳过以免启动时空扫。
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            info!(
                period_sec = self.period.as_secs(),
                targets = self.targets.len(),
                "reaper started"
            );
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

//! 时间源抽象：生产环境读系统时钟，测试中手动拨动。

use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

/// 毫秒级时间源。
pub(crate) trait Clock: Send + Sync {
    /// 当前 unix 毫秒。
    fn now_ms(&self) -> u64;
}

/// 共享时间源句柄。
pub(crate) type SharedClock = Arc<dyn Clock>;

/// 系统时钟。
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        rdv_shared_protocol::now_unix_millis()
    }
}

/// 返回默认系统时钟句柄。
pub(crate) fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// 测试时钟：时间只在显式调用时前进。
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn at(ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(ms),
        })
    }

    pub(crate) fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

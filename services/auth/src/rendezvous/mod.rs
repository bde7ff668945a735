//! 会合存储：一次性、限时、按句柄索引的条目。
//!
//! 三种用途（OAuth CSRF state、待确认绑定、扫码登录会话）共享同一套生命周期规则：
//! - 读取时必须检查过期，过期即视为不存在（清理任务只是优化）；
//! - 终态迁移通过 `take_if_status` 原子完成，条目不会被使用两次；
//! - 同一句柄上的并发迁移只有一个赢家。

pub(crate) mod memory;
pub(crate) mod reaper;
pub(crate) mod sqlite;

use std::fmt;

use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// 句柄最小熵（字节）。
pub(crate) const MIN_HANDLE_BYTES: usize = 16;

/// 服务端内部随机句柄（十六进制）。
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct Handle(String);

impl Handle {
    /// 从系统 CSPRNG 生成句柄；不足 16 字节时按 16 字节生成。
    pub(crate) fn generate(bytes: usize) -> Self {
        let mut raw = vec![0u8; bytes.max(MIN_HANDLE_BYTES)];
        OsRng.fill_bytes(&mut raw);
        Self(hex::encode(raw))
    }

    /// 包装已解码/已校验的句柄字符串。
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// 校验客户端直接回传的句柄（OAuth state、绑定令牌）：长度与十六进制字符集。
    pub(crate) fn parse(raw: &str, bytes: usize) -> Option<Self> {
        let raw = raw.trim();
        let valid = raw.len() == bytes * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(raw.to_ascii_lowercase()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用短指纹，避免完整句柄落盘。
    pub(crate) fn fingerprint(&self) -> &str {
        let end = self.0.len().min(8);
        self.0.get(..end).unwrap_or_default()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}…)", self.fingerprint())
    }
}

/// 载荷的生命周期阶段。
pub(crate) trait Stage: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// 持久化/比较用的字符串形式。
    fn as_str(self) -> &'static str;
    /// 到达该阶段时条目应被删除。
    fn is_terminal(self) -> bool;
}

/// 可放入会合存储的载荷。
pub(crate) trait Staged: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Stage: Stage;
    /// 存储种类标签（SQLite `kind` 列与日志）。
    const KIND: &'static str;

    fn stage(&self) -> Self::Stage;
    /// 迁移到新阶段；`at_ms` 为迁移发生时间，载荷可按需记录。
    fn set_stage(&mut self, stage: Self::Stage, at_ms: u64);
}

/// 单次使用载荷的阶段：签发后只能被消费一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OneShot {
    Issued,
    Consumed,
}

impl Stage for OneShot {
    fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Consumed => "consumed",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed)
    }
}

/// 存储条目。
#[derive(Debug, Clone)]
pub(crate) struct RendezvousEntry<P> {
    pub(crate) handle: Handle,
    pub(crate) created_at_ms: u64,
    pub(crate) ttl_ms: u64,
    pub(crate) payload: P,
}

impl<P> RendezvousEntry<P> {
    /// 绝对过期时间（毫秒）。
    pub(crate) fn expire_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    /// 年龄超过 ttl 即过期；恰好等于 ttl 时仍有效。
    pub(crate) fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expire_at_ms()
    }
}

/// 存储错误。
#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    /// 不存在或已过期。
    #[error("rendezvous entry not found")]
    NotFound,
    /// 存在但阶段不符（已被使用或状态错误）。
    #[error("rendezvous entry is in stage `{current}`")]
    Conflict { current: String },
    /// 句柄碰撞（内部错误，不应面向用户）。
    #[error("rendezvous handle already exists")]
    Duplicate,
    /// 后端故障。
    #[error("rendezvous backend failure: {0}")]
    Backend(String),
}

/// 会合存储接口。
#[async_trait]
pub(crate) trait RendezvousStore<P: Staged>: Send + Sync {
    /// 插入新条目；句柄已存在时返回 `Duplicate`。
    async fn put(
        &self,
        handle: Handle,
        payload: P,
        ttl_ms: u64,
    ) -> Result<RendezvousEntry<P>, StoreError>;

    /// 读取条目（含过期检查）。
    async fn get(&self, handle: &Handle) -> Result<RendezvousEntry<P>, StoreError>;

    /// 原子比较并迁移：阶段等于 `expected` 时迁移到 `next`（终态则删除），返回迁移前条目。
    async fn take_if_status(
        &self,
        handle: &Handle,
        expected: P::Stage,
        next: P::Stage,
    ) -> Result<RendezvousEntry<P>, StoreError>;

    /// 幂等删除；返回是否真的删掉了条目。
    async fn delete(&self, handle: &Handle) -> Result<bool, StoreError>;

    /// 清理已过期条目，返回清理数量。
    async fn sweep_expired(&self) -> Result<usize, StoreError>;

    /// 当前条目数（含尚未清理的过期条目）。
    async fn len(&self) -> Result<usize, StoreError>;
}

/// 单次使用载荷的便捷消费：`Issued → Consumed`。
pub(crate) async fn take_once<P>(
    store: &dyn RendezvousStore<P>,
    handle: &Handle,
) -> Result<RendezvousEntry<P>, StoreError>
where
    P: Staged<Stage = OneShot>,
{
    store
        .take_if_status(handle, OneShot::Issued, OneShot::Consumed)
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    //! 存储实现共用的测试载荷。

    use serde::{Deserialize, Serialize};

    use super::{Stage, Staged};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub(crate) enum Phase {
        Open,
        Half,
        Done,
    }

    impl Stage for Phase {
        fn as_str(self) -> &'static str {
            match self {
                Self::Open => "open",
                Self::Half => "half",
                Self::Done => "done",
            }
        }

        fn is_terminal(self) -> bool {
            matches!(self, Self::Done)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct Probe {
        pub(crate) phase: Phase,
        pub(crate) label: String,
    }

    impl Probe {
        pub(crate) fn open(label: &str) -> Self {
            Self {
                phase: Phase::Open,
                label: label.to_string(),
            }
        }
    }

    impl Staged for Probe {
        type Stage = Phase;
        const KIND: &'static str = "probe";

        fn stage(&self) -> Phase {
            self.phase
        }

        fn set_stage(&mut self, stage: Phase, _at_ms: u64) {
            self.phase = stage;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Handle, MIN_HANDLE_BYTES, RendezvousEntry};

    #[test]
    fn generated_handles_are_hex_and_never_shorter_than_minimum() {
        let short = Handle::generate(4);
        assert_eq!(short.as_str().len(), MIN_HANDLE_BYTES * 2);
        let qr = Handle::generate(32);
        assert_eq!(qr.as_str().len(), 64);
        assert!(qr.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(Handle::generate(32), qr);
    }

    #[test]
    fn parse_accepts_only_exact_length_hex() {
        let generated = Handle::generate(24);
        assert_eq!(Handle::parse(generated.as_str(), 24), Some(generated.clone()));
        assert_eq!(Handle::parse(generated.as_str(), 16), None);
        assert_eq!(Handle::parse(&"zz".repeat(24), 24), None);
        assert_eq!(Handle::parse("", 24), None);
    }

    #[test]
    fn debug_output_only_shows_fingerprint() {
        let handle = Handle::from_raw("0123456789abcdef0123456789abcdef");
        assert_eq!(format!("{handle:?}"), "Handle(01234567…)");
    }

    #[test]
    fn expiry_boundary_is_inclusive_of_ttl() {
        let entry = RendezvousEntry {
            handle: Handle::from_raw("h"),
            created_at_ms: 1_000,
            ttl_ms: 500,
            payload: (),
        };
        assert!(!entry.is_expired(1_500));
        assert!(entry.is_expired(1_501));
    }
}

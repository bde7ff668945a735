//! 内存会合存储：分片互斥，单句柄操作在分片锁内完成比较并迁移。

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    Handle, RendezvousEntry, RendezvousStore, Stage, Staged, StoreError, reaper::Sweepable,
};
use crate::clock::SharedClock;

/// 分片数：无关句柄落在不同分片，互不阻塞。
const SHARD_COUNT: usize = 16;

type Shard<P> = Mutex<HashMap<Handle, RendezvousEntry<P>>>;

/// 进程内会合存储。
pub(crate) struct MemoryRendezvousStore<P> {
    shards: Vec<Shard<P>>,
    clock: SharedClock,
}

impl<P: Staged> MemoryRendezvousStore<P> {
    pub(crate) fn new(clock: SharedClock) -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            clock,
        }
    }

    /// 按句柄哈希选择分片。
    fn shard(&self, handle: &Handle) -> &Shard<P> {
        let mut hasher = DefaultHasher::new();
        handle.hash(&mut hasher);
        let index = (hasher.finish() % SHARD_COUNT as u64) as usize;
        &self.shards[index]
    }
}

#[async_trait]
impl<P: Staged> RendezvousStore<P> for MemoryRendezvousStore<P> {
    async fn put(
        &self,
        handle: Handle,
        payload: P,
        ttl_ms: u64,
    ) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let mut guard = self.shard(&handle).lock().await;
        if let Some(existing) = guard.get(&handle)
            && !existing.is_expired(now)
        {
            return Err(StoreError::Duplicate);
        }
        let entry = RendezvousEntry {
            handle: handle.clone(),
            created_at_ms: now,
            ttl_ms,
            payload,
        };
        guard.insert(handle, entry.clone());
        Ok(entry)
    }

    async fn get(&self, handle: &Handle) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let mut guard = self.shard(handle).lock().await;
        let Some(entry) = guard.get(handle) else {
            return Err(StoreError::NotFound);
        };
        if entry.is_expired(now) {
            guard.remove(handle);
            return Err(StoreError::NotFound);
        }
        Ok(entry.clone())
    }

    async fn take_if_status(
        &self,
        handle: &Handle,
        expected: P::Stage,
        next: P::Stage,
    ) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let mut guard = self.shard(handle).lock().await;
        let Some(entry) = guard.get_mut(handle) else {
            return Err(StoreError::NotFound);
        };
        if entry.is_expired(now) {
            guard.remove(handle);
            return Err(StoreError::NotFound);
        }
        let current = entry.payload.stage();
        if current != expected {
            return Err(StoreError::Conflict {
                current: current.as_str().to_string(),
            });
        }

        let before = entry.clone();
        if next.is_terminal() {
            guard.remove(handle);
        } else {
            entry.payload.set_stage(next, now);
        }
        Ok(before)
    }

    async fn delete(&self, handle: &Handle) -> Result<bool, StoreError> {
        let mut guard = self.shard(handle).lock().await;
        Ok(guard.remove(handle).is_some())
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().await;
            let before = guard.len();
            guard.retain(|_, entry| !entry.is_expired(now));
            removed += before - guard.len();
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        Ok(total)
    }
}

#[async_trait]
impl<P: Staged> Sweepable for MemoryRendezvousStore<P> {
    fn name(&self) -> &'static str {
        P::KIND
    }

    async fn sweep(&self) -> Result<usize, StoreError> {
        self.sweep_expired().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::MemoryRendezvousStore;
    use crate::{
        clock::ManualClock,
        rendezvous::{
            Handle, RendezvousStore, StoreError,
            testing::{Phase, Probe},
        },
    };

    fn store_at(ms: u64) -> (Arc<ManualClock>, Arc<MemoryRendezvousStore<Probe>>) {
        let clock = ManualClock::at(ms);
        let store = Arc::new(MemoryRendezvousStore::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn put_rejects_live_duplicate_handle() {
        let (_clock, store) = store_at(0);
        let handle = Handle::from_raw("dup");
        store
            .put(handle.clone(), Probe::open("a"), 1_000)
            .await
            .expect("first put");
        let err = store
            .put(handle, Probe::open("b"), 1_000)
            .await
            .expect_err("second put must fail");
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn expired_entry_is_absent_before_any_sweep() {
        let (clock, store) = store_at(0);
        let handle = Handle::from_raw("ttl");
        store
            .put(handle.clone(), Probe::open("a"), 180_000)
            .await
            .expect("put");

        clock.set(180_000);
        assert!(store.get(&handle).await.is_ok());

        clock.set(180_001);
        assert!(matches!(store.get(&handle).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.take_if_status(&handle, Phase::Open, Phase::Half).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn take_if_status_returns_previous_payload_and_advances() {
        let (_clock, store) = store_at(0);
        let handle = Handle::from_raw("adv");
        store
            .put(handle.clone(), Probe::open("x"), 1_000)
            .await
            .expect("put");

        let before = store
            .take_if_status(&handle, Phase::Open, Phase::Half)
            .await
            .expect("open -> half");
        assert_eq!(before.payload.phase, Phase::Open);
        assert_eq!(
            store.get(&handle).await.expect("still present").payload.phase,
            Phase::Half
        );

        let again = store
            .take_if_status(&handle, Phase::Open, Phase::Half)
            .await
            .expect_err("second open -> half must conflict");
        assert!(matches!(again, StoreError::Conflict { ref current } if current == "half"));
    }

    #[tokio::test]
    async fn terminal_transition_removes_entry() {
        let (_clock, store) = store_at(0);
        let handle = Handle::from_raw("term");
        store
            .put(handle.clone(), Probe::open("x"), 1_000)
            .await
            .expect("put");
        store
            .take_if_status(&handle, Phase::Open, Phase::Done)
            .await
            .expect("open -> done");
        assert!(matches!(store.get(&handle).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.take_if_status(&handle, Phase::Open, Phase::Done).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_clock, store) = store_at(0);
        let handle = Handle::from_raw("del");
        store
            .put(handle.clone(), Probe::open("x"), 1_000)
            .await
            .expect("put");
        assert!(store.delete(&handle).await.expect("delete"));
        assert!(!store.delete(&handle).await.expect("delete again"));
    }

    #[tokio::test]
    async fn sweep_only_removes_entries_past_their_ttl() {
        let (clock, store) = store_at(0);
        store
            .put(Handle::from_raw("short"), Probe::open("s"), 100)
            .await
            .expect("put short");
        store
            .put(Handle::from_raw("long"), Probe::open("l"), 10_000)
            .await
            .expect("put long");

        clock.set(100);
        assert_eq!(store.sweep_expired().await.expect("sweep"), 0);

        clock.set(101);
        assert_eq!(store.sweep_expired().await.expect("sweep"), 1);
        assert_eq!(store.len().await.expect("len"), 1);
        assert!(store.get(&Handle::from_raw("long")).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_have_exactly_one_winner() {
        let (_clock, store) = store_at(0);
        let handle = Handle::from_raw("race");
        store
            .put(handle.clone(), Probe::open("x"), 60_000)
            .await
            .expect("put");

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                store.take_if_status(&handle, Phase::Open, Phase::Half).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.expect("join") {
                Ok(_) => winners += 1,
                Err(StoreError::Conflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 31);
    }
}

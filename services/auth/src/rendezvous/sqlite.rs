//! SQLite 会合存储：持久化行 + 带状态条件的 UPDATE/DELETE。
//!
//! 多实例共享同一数据库时，`take_if_status` 的原子性由
//! `WHERE status = ? AND expire_at_ms >= ?` 保证：`rows_affected = 0` 即竞争失败。

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

use super::{
    Handle, RendezvousEntry, RendezvousStore, Stage, Staged, StoreError, reaper::Sweepable,
};
use crate::clock::SharedClock;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS rendezvous_entries(
    kind TEXT NOT NULL,
    handle TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    expire_at_ms INTEGER NOT NULL,
    PRIMARY KEY(kind, handle)
)";

const CREATE_EXPIRY_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_rendezvous_expire
    ON rendezvous_entries(kind, expire_at_ms)";

/// 建立连接池。内存库只能用单连接，且连接不能被回收。
pub(crate) async fn connect_pool(url: &str) -> Result<SqlitePool, StoreError> {
    let in_memory = url.contains(":memory:");
    let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 8 });
    if in_memory {
        options = options.idle_timeout(None).max_lifetime(None);
    }
    options.connect(url).await.map_err(backend)
}

/// 基于 sqlx 的会合存储；`P::KIND` 区分同表内的不同用途。
pub(crate) struct SqliteRendezvousStore<P> {
    pool: SqlitePool,
    clock: SharedClock,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Staged> SqliteRendezvousStore<P> {
    /// 复用已有连接池（多个载荷类型共用一张表）。
    pub(crate) async fn with_pool(pool: SqlitePool, clock: SharedClock) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(backend)?;
        sqlx::query(CREATE_EXPIRY_INDEX)
            .execute(&pool)
            .await
            .map_err(backend)?;
        Ok(Self {
            pool,
            clock,
            _payload: PhantomData,
        })
    }

    /// 读取原始行；不做过期判断。
    async fn fetch_row(&self, handle: &Handle) -> Result<Option<Row>, StoreError> {
        sqlx::query_as::<_, Row>(
            "SELECT status,payload,created_at_ms,expire_at_ms
             FROM rendezvous_entries WHERE kind=? AND handle=?",
        )
        .bind(P::KIND)
        .bind(handle.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }

    /// 读取未过期行；过期行顺手删除。
    async fn fetch_live(&self, handle: &Handle, now: u64) -> Result<Row, StoreError> {
        let Some(row) = self.fetch_row(handle).await? else {
            return Err(StoreError::NotFound);
        };
        if from_db(row.3) < now {
            sqlx::query(
                "DELETE FROM rendezvous_entries WHERE kind=? AND handle=? AND expire_at_ms < ?",
            )
            .bind(P::KIND)
            .bind(handle.as_str())
            .bind(to_db(now))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            return Err(StoreError::NotFound);
        }
        Ok(row)
    }

    /// 条件语句未命中时，重新读取以区分“已删除”与“状态已变”。
    async fn lost_race(&self, handle: &Handle) -> StoreError {
        match self.fetch_row(handle).await {
            Ok(Some((status, ..))) => StoreError::Conflict { current: status },
            Ok(None) => StoreError::NotFound,
            Err(err) => err,
        }
    }
}

/// (status, payload, created_at_ms, expire_at_ms)
type Row = (String, String, i64, i64);

fn decode_entry<P: Staged>(handle: &Handle, row: Row) -> Result<RendezvousEntry<P>, StoreError> {
    let (_, payload, created_at_ms, expire_at_ms) = row;
    let payload: P = serde_json::from_str(&payload)
        .map_err(|err| StoreError::Backend(format!("decode {} payload: {err}", P::KIND)))?;
    let created_at_ms = from_db(created_at_ms);
    Ok(RendezvousEntry {
        handle: handle.clone(),
        created_at_ms,
        ttl_ms: from_db(expire_at_ms).saturating_sub(created_at_ms),
        payload,
    })
}

fn encode_payload<P: Staged>(payload: &P) -> Result<String, StoreError> {
    serde_json::to_string(payload)
        .map_err(|err| StoreError::Backend(format!("encode {} payload: {err}", P::KIND)))
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_db(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_db(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or_default()
}

#[async_trait]
impl<P: Staged> RendezvousStore<P> for SqliteRendezvousStore<P> {
    async fn put(
        &self,
        handle: Handle,
        payload: P,
        ttl_ms: u64,
    ) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let entry = RendezvousEntry {
            handle,
            created_at_ms: now,
            ttl_ms,
            payload,
        };

        // 过期残留不占用句柄。
        sqlx::query("DELETE FROM rendezvous_entries WHERE kind=? AND handle=? AND expire_at_ms < ?")
            .bind(P::KIND)
            .bind(entry.handle.as_str())
            .bind(to_db(now))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        sqlx::query(
            "INSERT INTO rendezvous_entries(kind,handle,status,payload,created_at_ms,expire_at_ms)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(P::KIND)
        .bind(entry.handle.as_str())
        .bind(entry.payload.stage().as_str())
        .bind(encode_payload(&entry.payload)?)
        .bind(to_db(entry.created_at_ms))
        .bind(to_db(entry.expire_at_ms()))
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => backend(err),
        })?;
        Ok(entry)
    }

    async fn get(&self, handle: &Handle) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let row = self.fetch_live(handle, now).await?;
        decode_entry(handle, row)
    }

    async fn take_if_status(
        &self,
        handle: &Handle,
        expected: P::Stage,
        next: P::Stage,
    ) -> Result<RendezvousEntry<P>, StoreError> {
        let now = self.clock.now_ms();
        let row = self.fetch_live(handle, now).await?;
        if row.0 != expected.as_str() {
            return Err(StoreError::Conflict { current: row.0 });
        }
        let before: RendezvousEntry<P> = decode_entry(handle, row)?;

        let result = if next.is_terminal() {
            sqlx::query(
                "DELETE FROM rendezvous_entries
                 WHERE kind=? AND handle=? AND status=? AND expire_at_ms >= ?",
            )
            .bind(P::KIND)
            .bind(handle.as_str())
            .bind(expected.as_str())
            .bind(to_db(now))
            .execute(&self.pool)
            .await
        } else {
            let mut advanced = before.payload.clone();
            advanced.set_stage(next, now);
            sqlx::query(
                "UPDATE rendezvous_entries SET status=?, payload=?
                 WHERE kind=? AND handle=? AND status=? AND expire_at_ms >= ?",
            )
            .bind(next.as_str())
            .bind(encode_payload(&advanced)?)
            .bind(P::KIND)
            .bind(handle.as_str())
            .bind(expected.as_str())
            .bind(to_db(now))
            .execute(&self.pool)
            .await
        }
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(self.lost_race(handle).await);
        }
        Ok(before)
    }

    async fn delete(&self, handle: &Handle) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM rendezvous_entries WHERE kind=? AND handle=?")
            .bind(P::KIND)
            .bind(handle.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let result = sqlx::query("DELETE FROM rendezvous_entries WHERE kind=? AND expire_at_ms < ?")
            .bind(P::KIND)
            .bind(to_db(now))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rendezvous_entries WHERE kind=?")
                .bind(P::KIND)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl<P: Staged> Sweepable for SqliteRendezvousStore<P> {
    fn name(&self) -> &'static str {
        P::KIND
    }

    async fn sweep(&self) -> Result<usize, StoreError> {
        self.sweep_expired().await
    }
}

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// Millisecond timestamps per key, newest first; each call is atomic on its own
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn push_timestamp(&self, key: &str, value: i64) -> Result<(), StoreError>;
    async fn length(&self, key: &str) -> Result<u64, StoreError>;
    // `n` counts from the newest entry, zero based
    async fn nth_newest(&self, key: &str, n: usize) -> Result<Option<i64>, StoreError>;
    async fn trim(&self, key: &str, keep: usize) -> Result<(), StoreError>;
}

// In-process store, for single instance deployments and tests
#[derive(Default)]
pub struct MemoryStore {
    windows: DashMap<String, VecDeque<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn push_timestamp(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.windows
            .entry(key.to_string())
            .or_default()
            .push_front(value);
        Ok(())
    }

    async fn length(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.windows.get(key).map_or(0, |w| w.len() as u64))
    }

    async fn nth_newest(&self, key: &str, n: usize) -> Result<Option<i64>, StoreError> {
        Ok(self.windows.get(key).and_then(|w| w.get(n).copied()))
    }

    async fn trim(&self, key: &str, keep: usize) -> Result<(), StoreError> {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.truncate(keep);
        }
        Ok(())
    }
}

// Redis list backed store, shared by every gateway instance
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn push_timestamp(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        debug!(key = %key, value, "pushed timestamp");
        Ok(())
    }

    async fn length(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen::<_, u64>(key).await?)
    }

    async fn nth_newest(&self, key: &str, n: usize) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let index = isize::try_from(n).map_err(|_| StoreError::Unavailable("index overflow".into()))?;
        Ok(conn.lindex::<_, Option<i64>>(key, index).await?)
    }

    async fn trim(&self, key: &str, keep: usize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if keep == 0 {
            conn.del::<_, ()>(key).await?;
            return Ok(());
        }
        let stop = isize::try_from(keep - 1).unwrap_or(isize::MAX);
        conn.ltrim::<_, ()>(key, 0, stop).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_is_newest_first() {
        let store = MemoryStore::new();
        for ts in [10, 20, 30] {
            store.push_timestamp("k", ts).await.unwrap();
        }

        assert_eq!(store.length("k").await.unwrap(), 3);
        assert_eq!(store.nth_newest("k", 0).await.unwrap(), Some(30));
        assert_eq!(store.nth_newest("k", 2).await.unwrap(), Some(10));
        assert_eq!(store.nth_newest("k", 3).await.unwrap(), None);

        store.trim("k", 2).await.unwrap();
        assert_eq!(store.length("k").await.unwrap(), 2);
        assert_eq!(store.nth_newest("k", 1).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn memory_store_missing_key_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.length("nobody").await.unwrap(), 0);
        assert_eq!(store.nth_newest("nobody", 0).await.unwrap(), None);
        store.trim("nobody", 1).await.unwrap();
    }

    // Runs against a live server only when REDIS_URL is set
    #[tokio::test]
    async fn redis_store_is_newest_first() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!(
            "chat-gateway-test:{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        store.trim(&key, 0).await.unwrap();

        for ts in [10, 20, 30] {
            store.push_timestamp(&key, ts).await.unwrap();
        }

        assert_eq!(store.length(&key).await.unwrap(), 3);
        assert_eq!(store.nth_newest(&key, 0).await.unwrap(), Some(30));
        assert_eq!(store.nth_newest(&key, 2).await.unwrap(), Some(10));
        assert_eq!(store.nth_newest(&key, 3).await.unwrap(), None);

        store.trim(&key, 2).await.unwrap();
        assert_eq!(store.length(&key).await.unwrap(), 2);
        assert_eq!(store.nth_newest(&key, 1).await.unwrap(), Some(20));

        store.trim(&key, 0).await.unwrap();
        assert_eq!(store.length(&key).await.unwrap(), 0);
        assert_eq!(store.nth_newest(&key, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_trim_to_zero_empties() {
        let store = MemoryStore::new();
        store.push_timestamp("k", 1).await.unwrap();
        store.trim("k", 0).await.unwrap();
        assert_eq!(store.length("k").await.unwrap(), 0);
    }
}

//! Car cache in front of the correlation engine
//!
//! Keys are the bare domain id, values the last car observed in a successful
//! response. Entries never expire; they are overwritten on PUT/PATCH and
//! removed on DELETE. The cache is advisory: callers log failures and carry on.

use async_trait::async_trait;
use dashmap::DashMap;
use event_schema::Car;
use redis::AsyncCommands;
use redis_utils::{RedisOpError, RedisPool};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisOpError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

pub fn cache_key(id: i64) -> String {
    id.to_string()
}

#[async_trait]
pub trait CarCache: Send + Sync {
    async fn get(&self, id: i64) -> CacheResult<Option<Car>>;

    /// Overwrite the entry for `car.id`
    async fn put(&self, car: &Car) -> CacheResult<()>;

    async fn invalidate(&self, id: i64) -> CacheResult<()>;

    /// Connectivity check for readiness
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Per-id write counter kept by the gateway
///
/// A GET miss reads the epoch before asking the data processor and only caches
/// the answer while the epoch is unchanged, so a document fetched before a
/// concurrent DELETE or write completes is not written back over it.
#[derive(Debug, Default)]
pub struct Invalidations {
    epochs: DashMap<i64, u64>,
}

impl Invalidations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self, id: i64) -> u64 {
        self.epochs.get(&id).map_or(0, |epoch| *epoch)
    }

    /// Mark every read of `id` started before now as stale
    pub fn bump(&self, id: i64) {
        *self.epochs.entry(id).or_insert(0) += 1;
    }
}

#[derive(Clone)]
pub struct RedisCarCache {
    pool: RedisPool,
}

impl RedisCarCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CarCache for RedisCarCache {
    async fn get(&self, id: i64) -> CacheResult<Option<Car>> {
        let key = cache_key(id);
        let raw: Option<String> = self
            .pool
            .run(|mut conn| {
                let key = key.clone();
                async move { conn.get(key).await }
            })
            .await?;

        let Some(data) = raw else {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        };

        match serde_json::from_str::<Car>(&data) {
            Ok(car) => {
                debug!(key = %key, "Cache hit");
                Ok(Some(car))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry corrupted, deleting");
                self.invalidate(id).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, car: &Car) -> CacheResult<()> {
        let key = cache_key(car.id);
        let data = serde_json::to_string(car)?;

        self.pool
            .run(|mut conn| {
                let key = key.clone();
                async move { conn.set::<_, _, ()>(key, data).await }
            })
            .await?;

        debug!(key = %key, "Cache set");
        Ok(())
    }

    async fn invalidate(&self, id: i64) -> CacheResult<()> {
        let key = cache_key(id);
        self.pool
            .run(|mut conn| {
                let key = key.clone();
                async move { conn.del::<_, ()>(key).await }
            })
            .await?;

        debug!(key = %key, "Cache delete");
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(self.pool.ping().await?)
    }
}

/// Process-local cache for tests and single-node runs
#[derive(Default)]
pub struct MemoryCarCache {
    entries: RwLock<HashMap<i64, Car>>,
}

impl MemoryCarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CarCache for MemoryCarCache {
    async fn get(&self, id: i64) -> CacheResult<Option<Car>> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn put(&self, car: &Car) -> CacheResult<()> {
        self.entries.write().await.insert(car.id, car.clone());
        Ok(())
    }

    async fn invalidate(&self, id: i64) -> CacheResult<()> {
        self.entries.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(id: i64, price: i64) -> Car {
        Car {
            id,
            name: "A".to_string(),
            price,
            year: "2020".to_string(),
        }
    }

    #[test]
    fn test_key_is_bare_id() {
        assert_eq!(cache_key(42), "42");
    }

    #[test]
    fn test_epochs_are_per_id() {
        let invalidations = Invalidations::new();
        assert_eq!(invalidations.epoch(1), 0);

        invalidations.bump(1);
        invalidations.bump(1);
        assert_eq!(invalidations.epoch(1), 2);
        assert_eq!(invalidations.epoch(2), 0);
    }

    #[tokio::test]
    async fn test_memory_cache_overwrite_and_invalidate() {
        let cache = MemoryCarCache::new();
        assert!(cache.get(1).await.unwrap().is_none());

        cache.put(&car(1, 10)).await.unwrap();
        cache.put(&car(1, 20)).await.unwrap();
        assert_eq!(cache.get(1).await.unwrap(), Some(car(1, 20)));

        cache.invalidate(1).await.unwrap();
        assert!(cache.get(1).await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_cache_round() {
        let pool = RedisPool::connect("redis://127.0.0.1:6379").await.unwrap();
        let cache = RedisCarCache::new(pool);

        cache.put(&car(-77, 10)).await.unwrap();
        assert_eq!(cache.get(-77).await.unwrap(), Some(car(-77, 10)));
        cache.invalidate(-77).await.unwrap();
        assert!(cache.get(-77).await.unwrap().is_none());
    }
}

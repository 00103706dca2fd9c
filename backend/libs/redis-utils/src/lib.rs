use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, RedisResult};
use resilience::{with_timeout_result, TimeoutError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

#[derive(Debug, thiserror::Error)]
pub enum RedisOpError {
    #[error("redis operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

/// Redis connection with a per-operation timeout
#[derive(Clone)]
pub struct RedisPool {
    manager: SharedConnectionManager,
    op_timeout: Duration,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager ready");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
            op_timeout: resilience::redis_config().timeout,
        })
    }

    /// Run `op` on a clone of the managed connection, bounded by the operation timeout
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, RedisOpError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.manager.lock().await.clone();
        with_timeout_result(self.op_timeout, op(conn))
            .await
            .map_err(|err| match err {
                TimeoutError::Elapsed(after) => RedisOpError::Timeout(after),
                TimeoutError::Failed(e) => RedisOpError::Redis(e),
            })
    }

    pub async fn ping(&self) -> Result<(), RedisOpError> {
        self.run(|mut conn| async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_ping_live_server() {
        let pool = RedisPool::connect("redis://127.0.0.1:6379").await.unwrap();
        pool.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        assert!(RedisPool::connect("not a url").await.is_err());
    }
}

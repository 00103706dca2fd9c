//! Car storage
//!
//! The processor only needs three primitives; `PgCarRepository` backs them
//! with PostgreSQL and `MemoryCarRepository` with a map for tests.

mod memory;
mod postgres;

pub use memory::MemoryCarRepository;
pub use postgres::PgCarRepository;

use async_trait::async_trait;
use event_schema::Car;
use resilience::{with_timeout_result, TimeoutError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Run a storage future within `limit`
pub(crate) async fn bounded<T, F>(limit: Duration, operation: F) -> StorageResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout_result(limit, operation)
        .await
        .map_err(|err| match err {
            TimeoutError::Elapsed(after) => StorageError::Timeout(after),
            TimeoutError::Failed(e) => StorageError::Database(e),
        })
}

#[async_trait]
pub trait CarRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> StorageResult<Option<Car>>;

    /// Insert or replace the whole document; returns what was stored
    async fn upsert(&self, car: &Car) -> StorageResult<Car>;

    /// Returns false when nothing was stored under `id`
    async fn delete_by_id(&self, id: i64) -> StorageResult<bool>;
}

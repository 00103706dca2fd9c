use async_trait::async_trait;
use event_schema::Car;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{CarRepository, StorageError, StorageResult};

/// Map-backed repository
#[derive(Default)]
pub struct MemoryCarRepository {
    cars: RwLock<HashMap<i64, Car>>,
    failing: AtomicBool,
}

impl MemoryCarRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cars(cars: impl IntoIterator<Item = Car>) -> Self {
        Self {
            cars: RwLock::new(cars.into_iter().map(|c| (c.id, c)).collect()),
            failing: AtomicBool::new(false),
        }
    }

    /// While set, every operation fails with `StorageError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.cars.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cars.read().await.is_empty()
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory repository offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CarRepository for MemoryCarRepository {
    async fn get_by_id(&self, id: i64) -> StorageResult<Option<Car>> {
        self.check()?;
        Ok(self.cars.read().await.get(&id).cloned())
    }

    async fn upsert(&self, car: &Car) -> StorageResult<Car> {
        self.check()?;
        self.cars.write().await.insert(car.id, car.clone());
        Ok(car.clone())
    }

    async fn delete_by_id(&self, id: i64) -> StorageResult<bool> {
        self.check()?;
        Ok(self.cars.write().await.remove(&id).is_some())
    }
}

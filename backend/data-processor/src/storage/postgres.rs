use async_trait::async_trait;
use event_schema::Car;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

use super::{bounded, CarRepository, StorageResult};

#[derive(sqlx::FromRow)]
struct CarRow {
    id: i64,
    name: String,
    price: i64,
    year: String,
}

impl From<CarRow> for Car {
    fn from(row: CarRow) -> Self {
        Car {
            id: row.id,
            name: row.name,
            price: row.price,
            year: row.year,
        }
    }
}

#[derive(Clone)]
pub struct PgCarRepository {
    pool: PgPool,
    /// Upper bound for a single query
    query_timeout: Duration,
}

impl PgCarRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: resilience::database_config().timeout,
        }
    }

    /// Create the `cars` table if it does not exist yet
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cars (
                id    BIGINT PRIMARY KEY,
                name  VARCHAR(100) NOT NULL,
                price BIGINT NOT NULL,
                year  VARCHAR(100) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("cars table ready");
        Ok(())
    }
}

#[async_trait]
impl CarRepository for PgCarRepository {
    async fn get_by_id(&self, id: i64) -> StorageResult<Option<Car>> {
        let query = sqlx::query_as::<_, CarRow>(
            r#"
            SELECT id, name, price, year
            FROM cars
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool);
        let row = bounded(self.query_timeout, query).await?;

        Ok(row.map(Car::from))
    }

    async fn upsert(&self, car: &Car) -> StorageResult<Car> {
        let query = sqlx::query_as::<_, CarRow>(
            r#"
            INSERT INTO cars (id, name, price, year)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price = EXCLUDED.price,
                year = EXCLUDED.year
            RETURNING id, name, price, year
            "#,
        )
        .bind(car.id)
        .bind(&car.name)
        .bind(car.price)
        .bind(&car.year)
        .fetch_one(&self.pool);
        let row = bounded(self.query_timeout, query).await?;

        debug!(id = car.id, "car upserted");
        Ok(row.into())
    }

    async fn delete_by_id(&self, id: i64) -> StorageResult<bool> {
        let query = sqlx::query("DELETE FROM cars WHERE id = $1")
            .bind(id)
            .execute(&self.pool);
        let result = bounded(self.query_timeout, query).await?;

        Ok(result.rows_affected() > 0)
    }
}

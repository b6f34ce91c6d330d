use crate::reading::{Reading, StoredReading};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Durable, append-only persistence of readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persists a reading; the store assigns the id.
    async fn insert(&self, reading: &Reading) -> Result<StoredReading, StoreError>;

    /// Most recent reading by timestamp, if any exist.
    async fn latest(&self) -> Result<Option<StoredReading>, StoreError>;

    /// Up to `limit` readings, newest first.
    async fn history(&self, limit: i64) -> Result<Vec<StoredReading>, StoreError>;
}

pub async fn build_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("Postgres did not answer SELECT 1")?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgReadingStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.bounded(
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS sensor_data (
                    id BIGSERIAL PRIMARY KEY,
                    temperature DOUBLE PRECISION NOT NULL,
                    humidity DOUBLE PRECISION NOT NULL,
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
            )
            .execute(&self.pool),
        )
        .await?;
        self.bounded(
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS sensor_data_timestamp_idx ON sensor_data (timestamp DESC)",
            )
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<StoredReading, StoreError> {
        let query = sqlx::query_as::<_, StoredReading>(
            r#"
            INSERT INTO sensor_data (temperature, humidity, timestamp)
            VALUES ($1, $2, $3)
            RETURNING id, temperature, humidity, timestamp
            "#,
        )
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.timestamp);
        self.bounded(query.fetch_one(&self.pool)).await
    }

    async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        let query = sqlx::query_as::<_, StoredReading>(
            r#"
            SELECT id, temperature, humidity, timestamp
            FROM sensor_data
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        );
        self.bounded(query.fetch_optional(&self.pool)).await
    }

    async fn history(&self, limit: i64) -> Result<Vec<StoredReading>, StoreError> {
        let query = sqlx::query_as::<_, StoredReading>(
            r#"
            SELECT id, temperature, humidity, timestamp
            FROM sensor_data
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit);
        self.bounded(query.fetch_all(&self.pool)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::env;

    async fn setup_test_store(database_url: &str, schema: &str) -> Result<PgReadingStore> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&admin_pool)
            .await?;
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin_pool)
            .await?;
        drop(admin_pool);

        let schema_name = schema.to_string();
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .after_connect(move |conn, _meta| {
                let schema = schema_name.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO {}", schema))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = PgReadingStore::new(pool, Duration::from_secs(10));
        store.ensure_schema().await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_pg_store_insert_latest_history() -> Result<()> {
        if env::var("SENSOR_INTEGRATION_TEST").ok().as_deref() != Some("1") {
            return Ok(());
        }
        let database_url = match env::var("SENSOR_TEST_DATABASE_URL") {
            Ok(value) => value,
            Err(_) => return Ok(()),
        };

        let schema = format!("sensor_test_{}", std::process::id());
        let store = setup_test_store(&database_url, &schema).await?;

        assert!(store.latest().await?.is_none());
        assert!(store.history(10).await?.is_empty());

        let base = Utc.with_ymd_and_hms(2025, 5, 29, 10, 0, 0).unwrap();
        let mut ids = Vec::new();
        for minute in [2, 0, 1] {
            let stored = store
                .insert(&Reading {
                    temperature: 20.0 + minute as f64,
                    humidity: 50.0,
                    timestamp: base + ChronoDuration::minutes(minute),
                })
                .await?;
            ids.push(stored.id);
        }
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let latest = store.latest().await?.expect("latest row");
        assert_eq!(latest.timestamp, base + ChronoDuration::minutes(2));
        assert_eq!(latest.temperature, 22.0);

        let history = store.history(2).await?;
        let temps: Vec<f64> = history.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![22.0, 21.0]);

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await?;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&admin_pool)
            .await?;
        Ok(())
    }
}

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

/// Key holding the most recent reading snapshot.
pub const LATEST_READING_KEY: &str = "latest_sensor_reading";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Key-value store with expiry. A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisSnapshotCache {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisSnapshotCache {
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid Redis URL")?;
        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .context("timed out connecting to Redis")?
            .context("failed to connect to Redis")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("failed to ping Redis server")?;
        Ok(Self { conn, timeout })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        self.bounded(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }
}

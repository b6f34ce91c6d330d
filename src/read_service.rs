use crate::cache::{SnapshotCache, LATEST_READING_KEY};
use crate::reading::StoredReading;
use crate::store::{ReadingStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HISTORY_LIMIT: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no readings available")]
    NotFound,
    #[error("limit must be a positive integer, got {0}")]
    InvalidLimit(i64),
    #[error("reading store failed: {0}")]
    Store(#[from] StoreError),
}

/// Answers latest/history queries, preferring the cache for the latest reading.
#[derive(Clone)]
pub struct ReadService {
    store: Arc<dyn ReadingStore>,
    cache: Arc<dyn SnapshotCache>,
    cache_ttl: Duration,
}

impl ReadService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        cache: Arc<dyn SnapshotCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    pub async fn get_latest(&self) -> Result<StoredReading, ReadError> {
        if let Some(cached) = self.cached_latest().await {
            return Ok(cached);
        }

        let latest = self.store.latest().await?.ok_or(ReadError::NotFound)?;
        self.repair_cache(&latest).await;
        Ok(latest)
    }

    pub async fn get_history(&self, limit: Option<i64>) -> Result<Vec<StoredReading>, ReadError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit <= 0 {
            return Err(ReadError::InvalidLimit(limit));
        }
        Ok(self.store.history(limit).await?)
    }

    // Cache errors and undecodable entries count as a miss.
    async fn cached_latest(&self) -> Option<StoredReading> {
        let raw = match self.cache.get(LATEST_READING_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error=%err, "cache read failed; falling back to store");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(error=%err, "ignoring undecodable cached reading");
                None
            }
        }
    }

    async fn repair_cache(&self, latest: &StoredReading) {
        let value = match serde_json::to_string(latest) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error=%err, "failed to encode reading for cache");
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set_ex(LATEST_READING_KEY, value, self.cache_ttl)
            .await
        {
            tracing::warn!(error=%err, id = latest.id, "failed to repopulate latest-reading cache");
        }
    }
}

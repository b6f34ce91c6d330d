use crate::alerts::{AlertPublisher, PublishError};
use crate::cache::{SnapshotCache, LATEST_READING_KEY};
use crate::reading::{parse_reading_payload, AlertEvent, StoredReading};
use crate::store::{ReadingStore, StoreError};
use crate::thresholds::{evaluate, ThresholdConfig};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Successful outcome of handling one broker message; the adapter acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Processed,
    /// Undecodable payload, dropped so it cannot block the queue.
    Discarded,
}

/// The message must stay unacknowledged so the broker redelivers it.
#[derive(Debug, thiserror::Error)]
pub enum Requeue {
    #[error("reading store failed: {0}")]
    Store(#[from] StoreError),
    #[error("alert publish failed: {0}")]
    Publish(#[from] PublishError),
}

/// Per-message handler driven by a broker consumer loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<Ack, Requeue>;
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub stored: AtomicU64,
    pub discarded: AtomicU64,
    pub requeued: AtomicU64,
    pub alerts_published: AtomicU64,
    pub cache_failures: AtomicU64,
    pub notifications: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            received = self.received.load(Ordering::Relaxed),
            stored = self.stored.load(Ordering::Relaxed),
            discarded = self.discarded.load(Ordering::Relaxed),
            requeued = self.requeued.load(Ordering::Relaxed),
            alerts_published = self.alerts_published.load(Ordering::Relaxed),
            cache_failures = self.cache_failures.load(Ordering::Relaxed),
            notifications = self.notifications.load(Ordering::Relaxed),
            last_error = self.last_error().as_deref().unwrap_or(""),
            "pipeline stats"
        );
    }
}

/// Store -> cache -> evaluate -> publish, once per inbound reading.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn ReadingStore>,
    cache: Arc<dyn SnapshotCache>,
    publisher: Arc<dyn AlertPublisher>,
    thresholds: ThresholdConfig,
    cache_ttl: Duration,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        cache: Arc<dyn SnapshotCache>,
        publisher: Arc<dyn AlertPublisher>,
        thresholds: ThresholdConfig,
        cache_ttl: Duration,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            thresholds,
            cache_ttl,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    async fn cache_snapshot(&self, stored: &StoredReading) {
        let value = match serde_json::to_string(stored) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error=%err, id = stored.id, "failed to encode reading snapshot");
                self.stats.cache_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set_ex(LATEST_READING_KEY, value, self.cache_ttl)
            .await
        {
            tracing::warn!(error=%err, id = stored.id, "failed to cache latest reading; continuing");
            self.stats.cache_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl MessageHandler for IngestPipeline {
    async fn handle(&self, payload: &[u8]) -> Result<Ack, Requeue> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let mut buf = payload.to_vec();
        let reading = match parse_reading_payload(&mut buf, Utc::now()) {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(error=%err, "discarding malformed reading payload");
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                return Ok(Ack::Discarded);
            }
        };
        tracing::info!(
            temperature = reading.temperature,
            humidity = reading.humidity,
            "received reading"
        );

        let stored = match self.store.insert(&reading).await {
            Ok(stored) => stored,
            Err(err) => {
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                return Err(err.into());
            }
        };
        self.stats.stored.fetch_add(1, Ordering::Relaxed);

        self.cache_snapshot(&stored).await;

        if let Some(reason) = evaluate(&stored.reading(), &self.thresholds) {
            let event = AlertEvent::new(reason.to_string());
            if let Err(err) = self.publisher.publish(&event).await {
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                return Err(err.into());
            }
            self.stats.alerts_published.fetch_add(1, Ordering::Relaxed);
            tracing::info!(id = stored.id, alert = %event.message, "published alert");
        }

        Ok(Ack::Processed)
    }
}

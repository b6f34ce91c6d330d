use crate::alerts::{AlertPublisher, AlertSink, PublishError};
use crate::cache::{CacheError, SnapshotCache};
use crate::reading::{AlertEvent, Reading, StoredReading};
use crate::store::{ReadingStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredReading>>,
    insert_calls: AtomicUsize,
    read_calls: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StoredReading> {
        self.rows.lock().unwrap().clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.insert_calls.store(0, Ordering::SeqCst);
        self.read_calls.store(0, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn newest_first(&self) -> Vec<StoredReading> {
        let mut rows = self.rows();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: &Reading) -> Result<StoredReading, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(30)));
        }
        let mut rows = self.rows.lock().unwrap();
        let stored = StoredReading {
            id: rows.len() as i64 + 1,
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.timestamp,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn latest(&self) -> Result<Option<StoredReading>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(30)));
        }
        Ok(self.newest_first().into_iter().next())
    }

    async fn history(&self, limit: i64) -> Result<Vec<StoredReading>, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(30)));
        }
        Ok(self
            .newest_first()
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String, Duration)>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preload(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Every successful `set_ex` as `(key, value, ttl)`.
    pub fn writes(&self) -> Vec<(String, String, Duration)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(Duration::from_secs(2)));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(Duration::from_secs(2)));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value, ttl));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<AlertEvent>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<AlertEvent> {
        self.published.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertPublisher for RecordingPublisher {
    async fn publish(&self, event: &AlertEvent) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("broker down".into()));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<AlertEvent>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<AlertEvent> {
        self.received.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn notify(&self, event: &AlertEvent) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(event.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("pager unreachable");
        }
        Ok(())
    }
}

//! In-process store
//!
//! Mirrors the Redis semantics the pipeline relies on (positional bulk replies,
//! per-key expiration, expired keys read as absent) and counts every call as
//! one round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StoreError, StoreWrite, TripStore};
use crate::key::StoreKey;

#[derive(Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    round_trips: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made through [`TripStore`] so far; bulk and single calls count one each.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Individual keys written so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Stored bytes for `key`, ignoring expired values.
    pub async fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .filter(|v| v.live(now))
            .map(|v| v.data.clone())
    }

    /// Time left before `key` expires.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .filter(|v| v.live(now))
            .map(|v| v.expires_at - now)
    }

    /// Seeds a value without counting a round trip.
    pub async fn insert_raw(&self, key: &str, data: impl Into<Vec<u8>>, ttl: Duration) {
        self.entries.lock().await.insert(
            key.to_string(),
            StoredValue {
                data: data.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|v| v.live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn count_round_trip(&self) {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
    }

    fn write_locked(&self, entries: &mut HashMap<String, StoredValue>, write: &StoreWrite) {
        entries.insert(
            write.key.as_str().to_string(),
            StoredValue {
                data: write.value.clone(),
                expires_at: Instant::now() + write.ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TripStore for MemoryStore {
    async fn exists_many(&self, keys: &[StoreKey]) -> Result<Vec<bool>, StoreError> {
        self.count_round_trip();
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|k| entries.get(k.as_str()).is_some_and(|v| v.live(now)))
            .collect())
    }

    async fn get_many(&self, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.count_round_trip();
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|k| {
                entries
                    .get(k.as_str())
                    .filter(|v| v.live(now))
                    .map(|v| v.data.clone())
            })
            .collect())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.count_round_trip();
        Ok(self.raw(key.as_str()).await)
    }

    async fn set_many_with_expiry(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        self.count_round_trip();
        let mut entries = self.entries.lock().await;
        for write in writes {
            self.write_locked(&mut entries, write);
        }
        Ok(())
    }

    async fn set_with_expiry(&self, write: &StoreWrite) -> Result<(), StoreError> {
        self.count_round_trip();
        let mut entries = self.entries.lock().await;
        self.write_locked(&mut entries, write);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

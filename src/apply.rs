//! Writes a [`WritePlan`](crate::plan::WritePlan) to the store in pipelined sub-batches.
//!
//! Each sub-batch is encoded, sent as one round trip and finished before the
//! next one is built. When a sub-batch fails as a whole, its keys are retried
//! once each with single-key writes; the remaining sub-batches still run.

use tracing::{debug, error, warn};

use crate::error::{BatchApplyError, SingleApplyError};
use crate::key::StoreKey;
use crate::plan::PlannedWrite;
use crate::store::{StoreError, StoreWrite, TripStore};

/// What happened to the writes of one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub attempted: usize,
    /// Keys written by a successful pipelined round trip.
    pub batched: usize,
    /// Keys written by a single-key retry after their sub-batch failed.
    pub fallback_applied: usize,
    /// Keys not written this cycle.
    pub fallback_failures: usize,
    pub sub_batches: usize,
    pub failed_sub_batches: usize,
    pub failed_keys: Vec<StoreKey>,
}

impl ApplyReport {
    pub fn applied(&self) -> usize {
        self.batched + self.fallback_applied
    }
}

pub struct BatchApplier<'a, S: ?Sized> {
    store: &'a S,
    max_batch_size: usize,
}

impl<'a, S> BatchApplier<'a, S>
where
    S: TripStore + ?Sized,
{
    pub fn new(store: &'a S, max_batch_size: usize) -> Self {
        Self {
            store,
            max_batch_size: max_batch_size.max(1),
        }
    }

    #[tracing::instrument(skip_all, fields(writes = writes.len(), max_batch_size = self.max_batch_size))]
    pub async fn apply(&self, writes: &[PlannedWrite]) -> ApplyReport {
        let mut report = ApplyReport {
            attempted: writes.len(),
            ..Default::default()
        };

        for (index, chunk) in writes.chunks(self.max_batch_size).enumerate() {
            let batch = self.encode(chunk, &mut report);
            if batch.is_empty() {
                continue;
            }

            report.sub_batches += 1;
            match self.store.set_many_with_expiry(&batch).await {
                Ok(()) => {
                    debug!(sub_batch = index, keys = batch.len(), "Sub-batch written");
                    report.batched += batch.len();
                }
                Err(cause) => {
                    let err = BatchApplyError {
                        keys: batch.len(),
                        cause,
                    };
                    warn!(sub_batch = index, error = %err, cause = %err.cause, "Falling back to single-key writes");
                    report.failed_sub_batches += 1;
                    self.fallback(&batch, &mut report).await;
                }
            }
        }

        if report.fallback_failures > 0 {
            warn!(
                failed = report.fallback_failures,
                applied = report.applied(),
                "Some keys were not written this cycle"
            );
        }

        report
    }

    fn encode(&self, chunk: &[PlannedWrite], report: &mut ApplyReport) -> Vec<StoreWrite> {
        let mut batch = Vec::with_capacity(chunk.len());
        for write in chunk {
            match write.entry.encode() {
                Ok(value) => batch.push(StoreWrite {
                    key: write.key.clone(),
                    value,
                    ttl: write.ttl,
                }),
                Err(e) => record_failure(
                    report,
                    SingleApplyError {
                        key: write.key.to_string(),
                        cause: StoreError::Serialization(e.to_string()),
                    },
                    write.key.clone(),
                ),
            }
        }
        batch
    }

    async fn fallback(&self, batch: &[StoreWrite], report: &mut ApplyReport) {
        for write in batch {
            match self.store.set_with_expiry(write).await {
                Ok(()) => report.fallback_applied += 1,
                Err(cause) => record_failure(
                    report,
                    SingleApplyError {
                        key: write.key.to_string(),
                        cause,
                    },
                    write.key.clone(),
                ),
            }
        }
    }
}

fn record_failure(report: &mut ApplyReport, err: SingleApplyError, key: StoreKey) {
    error!(key = %err.key, error = %err, cause = %err.cause, "Write lost for this cycle");
    report.fallback_failures += 1;
    report.failed_keys.push(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StopObservation, StoreEntry, canonical_time};
    use crate::plan::WriteKind;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(12 * 3600);

    fn planned(i: usize) -> PlannedWrite {
        let trip_id = format!("T{i}");
        let time = canonical_time::parse("2025-01-01T00:00:00Z").unwrap();
        PlannedWrite {
            key: StoreKey::derive(&trip_id, "R1"),
            entry: StoreEntry {
                trip_id,
                route_id: "R1".to_string(),
                stops: vec![
                    StopObservation::new("S1", 1, 0, time),
                    StopObservation::new("S2", 2, 0, time),
                ],
            },
            ttl: TTL,
            kind: WriteKind::Create,
        }
    }

    fn planned_many(n: usize) -> Vec<PlannedWrite> {
        (0..n).map(planned).collect()
    }

    #[tokio::test]
    async fn test_round_trips_are_ceil_k_over_t() {
        for (k, t, expected) in [(0, 500, 0), (1, 500, 1), (500, 500, 1), (501, 500, 2), (1200, 500, 3), (7, 3, 3)] {
            let store = MemoryStore::new();
            let report = BatchApplier::new(&store, t).apply(&planned_many(k)).await;

            assert_eq!(store.round_trips(), expected, "k={k} t={t}");
            assert_eq!(report.sub_batches, expected);
            assert_eq!(report.batched, k);
            assert_eq!(store.len().await, k);
        }
    }

    #[tokio::test]
    async fn test_every_written_key_gets_ttl() {
        let store = MemoryStore::new();
        BatchApplier::new(&store, 500).apply(&planned_many(3)).await;

        for i in 0..3 {
            let ttl = store.ttl(&format!("gtfs:T{i}:R1")).await.unwrap();
            assert!(ttl > TTL - Duration::from_secs(5));
        }
    }

    /// Fails selected bulk calls (by call index) and single writes (by key).
    struct FailingWrites {
        inner: MemoryStore,
        failing_batches: HashSet<usize>,
        failing_keys: HashSet<String>,
        batch_calls: Mutex<usize>,
        single_calls: Mutex<Vec<String>>,
    }

    impl FailingWrites {
        fn new(failing_batches: &[usize], failing_keys: &[&str]) -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_batches: failing_batches.iter().copied().collect(),
                failing_keys: failing_keys.iter().map(|k| k.to_string()).collect(),
                batch_calls: Mutex::new(0),
                single_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TripStore for FailingWrites {
        async fn exists_many(&self, keys: &[StoreKey]) -> Result<Vec<bool>, StoreError> {
            self.inner.exists_many(keys).await
        }

        async fn get_many(&self, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
            self.inner.get_many(keys).await
        }

        async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn set_many_with_expiry(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
            let call = {
                let mut calls = self.batch_calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            if self.failing_batches.contains(&call) {
                return Err(StoreError::Timeout(Duration::from_secs(5)));
            }
            self.inner.set_many_with_expiry(writes).await
        }

        async fn set_with_expiry(&self, write: &StoreWrite) -> Result<(), StoreError> {
            self.single_calls
                .lock()
                .unwrap()
                .push(write.key.to_string());
            if self.failing_keys.contains(write.key.as_str()) {
                return Err(StoreError::Connection("broken pipe".to_string()));
            }
            self.inner.set_with_expiry(write).await
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failed_sub_batch_retries_each_key_once() {
        // 5 writes, T = 2: sub-batches [0,1] [2,3] [4]; the second one fails.
        let store = FailingWrites::new(&[1], &[]);
        let report = BatchApplier::new(&store, 2).apply(&planned_many(5)).await;

        let singles = store.single_calls.lock().unwrap().clone();
        assert_eq!(singles, ["gtfs:T2:R1", "gtfs:T3:R1"]);
        assert_eq!(report.sub_batches, 3);
        assert_eq!(report.failed_sub_batches, 1);
        assert_eq!(report.batched, 3);
        assert_eq!(report.fallback_applied, 2);
        assert_eq!(report.applied(), 5);
        assert_eq!(store.inner.len().await, 5);
    }

    #[tokio::test]
    async fn test_fallback_failures_do_not_stop_processing() {
        let store = FailingWrites::new(&[0, 1], &["gtfs:T0:R1", "gtfs:T3:R1"]);
        let report = BatchApplier::new(&store, 2).apply(&planned_many(5)).await;

        assert_eq!(store.single_calls.lock().unwrap().len(), 4);
        assert_eq!(report.fallback_failures, 2);
        assert_eq!(report.applied(), 5 - report.fallback_failures);
        assert_eq!(
            report.failed_keys,
            vec![StoreKey::derive("T0", "R1"), StoreKey::derive("T3", "R1")]
        );
        assert_eq!(store.inner.raw("gtfs:T0:R1").await, None);
        assert!(store.inner.raw("gtfs:T4:R1").await.is_some());
    }

    #[tokio::test]
    async fn test_every_sub_batch_failing_falls_back_for_all() {
        let store = FailingWrites::new(&[0, 1, 2], &[]);
        let report = BatchApplier::new(&store, 2).apply(&planned_many(5)).await;

        assert_eq!(report.batched, 0);
        assert_eq!(report.fallback_applied, 5);
        assert_eq!(store.single_calls.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let store = MemoryStore::new();
        let applier = BatchApplier::new(&store, 0);
        assert_eq!(applier.max_batch_size, 1);
    }
}

//! Key-value store abstraction.
//!
//! [`TripStore`] exposes each operation in a bulk form (one round trip for many
//! keys) and a single-key form used for fallbacks. The planner and applier only
//! see this trait.
//!
//! [`RedisStore`] talks to Redis (or Valkey, Dragonfly) over a bounded
//! connection pool. [`MemoryStore`] keeps everything in process and counts
//! round trips, which is what the tests run against.

mod error;
mod memory;
mod redis;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::key::StoreKey;

/// One encoded value to write with its expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub key: StoreKey,
    pub value: Vec<u8>,
    pub ttl: Duration,
}

/// Key-value backend used by one ETL cycle.
///
/// Bulk methods return results positionally, one per input key. A bulk call
/// either succeeds for every key or fails as a whole.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Existence of each key, in one round trip.
    async fn exists_many(&self, keys: &[StoreKey]) -> Result<Vec<bool>, StoreError>;

    /// Raw payload of each key (`None` when absent), in one round trip.
    async fn get_many(&self, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes every value with its expiration, in one round trip.
    async fn set_many_with_expiry(&self, writes: &[StoreWrite]) -> Result<(), StoreError>;

    async fn set_with_expiry(&self, write: &StoreWrite) -> Result<(), StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Redis expirations are whole seconds; never send 0, which SETEX rejects.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Checks a positional bulk reply has one item per key.
pub(crate) fn expect_len<T>(replies: Vec<T>, expected: usize) -> Result<Vec<T>, StoreError> {
    if replies.len() == expected {
        Ok(replies)
    } else {
        Err(StoreError::Protocol(format!(
            "expected {expected} replies, got {}",
            replies.len()
        )))
    }
}

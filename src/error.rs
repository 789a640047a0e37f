//! Error taxonomy for one ETL cycle.
//!
//! Only [`FeedUnavailableError`] ends a cycle early. Everything else is
//! logged, counted and reported through the run summary.

use thiserror::Error;

use crate::store::StoreError;

/// The upstream feed could not be fetched or decoded at all.
#[derive(Debug, Error)]
#[error("feed unavailable from {origin}: {reason}")]
pub struct FeedUnavailableError {
    pub origin: String,
    pub reason: String,
}

impl FeedUnavailableError {
    pub fn new(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

/// A raw trip that cannot be reduced to two stops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncompleteTripError {
    #[error("trip has no trip_id")]
    MissingTripId,

    #[error("trip {trip_id} has no route_id")]
    MissingRouteId { trip_id: String },

    #[error("trip {trip_id} has {usable} usable stop updates, need at least 2")]
    TooFewStops { trip_id: String, usable: usize },
}

/// A stored payload that does not decode to the entry for its key.
#[derive(Debug, Error)]
#[error("malformed entry at {key}: {reason}")]
pub struct MalformedEntryError {
    pub key: String,
    pub reason: String,
}

/// A pipelined sub-batch of writes failed as a whole.
#[derive(Debug, Error)]
#[error("batched write of {keys} keys failed")]
pub struct BatchApplyError {
    pub keys: usize,
    #[source]
    pub cause: StoreError,
}

/// A single-key fallback write failed; the key keeps its previous value this cycle.
#[derive(Debug, Error)]
#[error("write to {key} failed")]
pub struct SingleApplyError {
    pub key: String,
    #[source]
    pub cause: StoreError,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("retention must be at least one hour")]
    ZeroRetention,

    #[error("retention of {0} hours is too long")]
    RetentionTooLong(u64),

    #[error("max batch size must be at least 1")]
    ZeroBatchSize,

    #[error("redis pool size must be at least 1")]
    ZeroPoolSize,

    #[error("invalid redis connection settings: {0}")]
    InvalidRedis(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_incomplete_trip_display() {
        let err = IncompleteTripError::TooFewStops {
            trip_id: "T9".to_string(),
            usable: 1,
        };
        assert_eq!(
            err.to_string(),
            "trip T9 has 1 usable stop updates, need at least 2"
        );
    }

    #[test]
    fn test_batch_apply_error_keeps_source() {
        let err = BatchApplyError {
            keys: 3,
            cause: StoreError::Connection("refused".to_string()),
        };
        assert_eq!(err.to_string(), "batched write of 3 keys failed");
        assert!(err.source().unwrap().to_string().contains("refused"));
    }

    #[test]
    fn test_feed_unavailable_display() {
        let err = FeedUnavailableError::new("https://example.test/feed", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "feed unavailable from https://example.test/feed: HTTP 503"
        );
    }
}

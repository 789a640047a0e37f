//! Store error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store round trip timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = StoreError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "Store connection error: connection refused");
    }

    #[test]
    fn test_timeout_error_display() {
        let err = StoreError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Store round trip timed out after 5s");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = StoreError::Protocol("expected 2 replies, got 1".to_string());
        assert_eq!(
            err.to_string(),
            "Store protocol error: expected 2 replies, got 1"
        );
    }
}

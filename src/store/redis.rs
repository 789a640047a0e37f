//! Redis-compatible store using deadpool-redis
//!
//! Bulk operations are sent as non-transactional pipelines, so one sub-batch is
//! one network round trip. Every round trip checks a connection out of the pool
//! and returns it when the guard drops, and is bounded by the configured
//! command timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::{debug, warn};

use super::{StoreError, StoreWrite, TripStore, expect_len, ttl_secs};
use crate::config::StoreConfig;
use crate::key::StoreKey;

pub struct RedisStore {
    pool: Pool,
    command_timeout: Duration,
}

impl RedisStore {
    /// Builds the pool without opening a connection; connections are made on
    /// the first round trip.
    pub fn build(config: &StoreConfig) -> Result<Self, StoreError> {
        let redacted = config.redacted_url();
        let url = config
            .url()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut pool_config = Config::from_url(url.as_str());
        pool_config.pool = Some(deadpool_redis::PoolConfig {
            max_size: config.pool_size,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(config.command_timeout),
                create: Some(config.command_timeout),
                recycle: Some(config.command_timeout),
            },
            ..Default::default()
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create Redis pool for {redacted}: {e}"))
            })?;

        debug!(url = %redacted, pool_size = config.pool_size, "Redis pool created");
        Ok(Self {
            pool,
            command_timeout: config.command_timeout,
        })
    }

    /// Builds the pool and probes the server once.
    ///
    /// An unreachable server is logged, not returned: each cycle's round trips
    /// then fail into the planner and applier fallbacks until it comes back.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::build(config)?;
        match store.ping().await {
            Ok(()) => debug!(url = %config.redacted_url(), "Redis answered PING"),
            Err(e) => warn!(
                url = %config.redacted_url(),
                error = %e,
                "Redis not reachable yet, continuing"
            ),
        }
        Ok(store)
    }

    /// Checks the server answers `PING` within the command timeout.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))?
    }
}

#[async_trait]
impl TripStore for RedisStore {
    async fn exists_many(&self, keys: &[StoreKey]) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.exists(key.as_str());
            }
            let flags: Vec<bool> = pipe.query_async(&mut conn).await?;
            expect_len(flags, keys.len())
        })
        .await
    }

    async fn get_many(&self, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.get(key.as_str());
            }
            let values: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;
            expect_len(values, keys.len())
        })
        .await
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let value: Option<Vec<u8>> = conn.get(key.as_str()).await?;
            Ok(value)
        })
        .await
    }

    async fn set_many_with_expiry(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut pipe = redis::pipe();
            for write in writes {
                pipe.set_ex(write.key.as_str(), write.value.as_slice(), ttl_secs(write.ttl))
                    .ignore();
            }
            let () = pipe.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn set_with_expiry(&self, write: &StoreWrite) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.conn().await?;
            let _: () = conn
                .set_ex(write.key.as_str(), write.value.as_slice(), ttl_secs(write.ttl))
                .await?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

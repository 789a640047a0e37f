//! Validated runtime settings.
//!
//! Values arrive from CLI flags or their environment fallbacks (see `main.rs`);
//! these types only check them and turn them into something the pipeline can use.

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-cycle behaviour of the planner and applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Expiration applied to every key written in a cycle.
    pub retention: Duration,
    /// Largest number of writes sent in one pipelined round trip.
    pub max_batch_size: usize,
}

impl RunConfig {
    /// Retention has no default: callers must say how long entries live.
    pub fn new(retention_hours: u64, max_batch_size: usize) -> Result<Self, ConfigError> {
        if retention_hours == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        let retention_secs = retention_hours
            .checked_mul(3600)
            .ok_or(ConfigError::RetentionTooLong(retention_hours))?;
        Ok(Self {
            retention: Duration::from_secs(retention_secs),
            max_batch_size,
        })
    }
}

/// Connection settings for the Redis-compatible store.
#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub tls: bool,
    pub pool_size: usize,
    pub command_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            tls: false,
            pool_size: DEFAULT_POOL_SIZE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .field("pool_size", &self.pool_size)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl StoreConfig {
    /// Connection URL with credentials percent-encoded.
    pub fn url(&self) -> Result<Url, ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }

        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!(
            "{scheme}://{}:{}/{}",
            self.host, self.port, self.db
        ))
        .map_err(|e| ConfigError::InvalidRedis(e.to_string()))?;

        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| ConfigError::InvalidRedis("username not accepted".to_string()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| ConfigError::InvalidRedis("password not accepted".to_string()))?;
        }

        Ok(url)
    }

    /// Same as [`StoreConfig::url`] with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match self.url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

/// `DATABASE_URL` value that selects the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Secret<String>,
    pub host: String,
    pub port: u16,
    pub max_connections: u32,

    // Store initialisation retry tuning
    pub retry_count: u32,
    pub retry_delay_secs: u64,
    pub retry_backoff: u32,
}

/// Bounded exponential backoff used while the store is not yet reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    fn from_source(config: &config::Config) -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: Secret::new(config.get("database_url")?),
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: optional(config, "port", 8080)?,
            max_connections: optional(config, "max_connections", 10)?,

            retry_count: optional(config, "retry_count", 5)?,
            retry_delay_secs: optional(config, "retry_delay", 1)?,
            retry_backoff: optional(config, "retry_backoff", 2)?,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.expose_secret() == MEMORY_DATABASE_URL
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_count.max(1),
            delay: Duration::from_secs(self.retry_delay_secs),
            backoff: self.retry_backoff.max(1),
        }
    }
}

/// Reads an optional key, falling back to `default` only when it is absent.
fn optional<T>(config: &config::Config, key: &str, default: T) -> Result<T, config::ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    match config.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

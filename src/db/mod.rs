use secrecy::ExposeSecret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use crate::config::{Config, RetryPolicy};

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryPromotionStore;
pub use postgres::PgPromotionStore;
pub use store::{PromotionFilter, PromotionStore};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Runs `op` until it succeeds or `policy.attempts` is exhausted, sleeping
/// between attempts with exponentially growing delays. The last error is
/// returned when every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = policy.delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts => {
                tracing::warn!(
                    attempt,
                    attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "{} failed, retrying",
                    what
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(policy.backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Opens the configured store. For Postgres this connects and applies the
/// schema, retrying while the database is not yet reachable.
pub async fn init_store(config: &Config) -> anyhow::Result<Arc<dyn PromotionStore>> {
    if config.uses_memory_store() {
        tracing::warn!("Using the in-memory promotion store, data will not survive a restart");
        return Ok(Arc::new(MemoryPromotionStore::new()));
    }

    let pool = retry_with_backoff(config.retry_policy(), "Store initialisation", || async move {
        let pool = create_pool(config.database_url.expose_secret(), config.max_connections).await?;
        run_migrations(&pool).await?;
        Ok::<_, sqlx::Error>(pool)
    })
    .await?;

    Ok(Arc::new(PgPromotionStore::new(pool)))
}

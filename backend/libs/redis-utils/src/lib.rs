use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Default bound for a single Redis operation, connect included.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooled Redis connection handle.
///
/// The underlying `ConnectionManager` multiplexes commands over one
/// connection and re-establishes it after broken links; callers share it
/// through `manager()`.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse Redis connection string")?;

        let connection_manager = with_timeout(ConnectionManager::new(client))
            .await
            .context("timed out initializing Redis connection manager")?
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection established");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Run a Redis future under the default operation timeout.
pub async fn with_timeout<F, T>(fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    with_timeout_after(DEFAULT_OP_TIMEOUT, fut).await
}

/// Run a Redis future under an explicit timeout.
pub async fn with_timeout_after<F, T>(
    limit: Duration,
    fut: F,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_through_ready_values() {
        let value = with_timeout(async { 42u64 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn with_timeout_after_elapses_on_stalled_future() {
        let result = with_timeout_after(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let result = RedisPool::connect("not-a-redis-url").await;
        assert!(result.is_err());
    }
}

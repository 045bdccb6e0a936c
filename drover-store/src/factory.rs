//! Backend selection from configuration

use drover_config::{StoreBackend, StoreConfig};
use std::sync::Arc;
use tracing::info;

use crate::error::StoreResult;
use crate::memory::InMemoryStore;
use crate::provider::StoreProvider;

/// Open the configured backend.
///
/// Connecting to a remote backend is retried while the failure looks
/// transient.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn StoreProvider>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StoreConfig) -> StoreResult<Arc<dyn StoreProvider>> {
    use crate::redis::RedisStore;
    use drover_resilience::{RetryExecutor, RetryPolicy};
    use std::time::Duration;

    let executor = RetryExecutor::new(RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
        ..RetryPolicy::default()
    });
    let store = executor
        .execute(|| RedisStore::connect(&config.url, config.connect_timeout))
        .await
        .map_err(|e| e.into_inner())?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &StoreConfig) -> StoreResult<Arc<dyn StoreProvider>> {
    Err(crate::error::StoreError::InvalidArgument(
        "redis backend requested but drover-store was built without the redis feature"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend() {
        let config = StoreConfig::in_memory("test");
        let store = connect(&config).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_invalid_redis_url_is_not_retried() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            url: "not a url".to_string(),
            ..StoreConfig::default()
        };
        let err = match connect(&config).await {
            Err(e) => e,
            Ok(_) => panic!("connected with an invalid url"),
        };
        assert!(!err.is_unavailable());
    }
}

//! Distributed locks built on the store's compare-and-set primitives
//!
//! A lock is a key holding a random token with an expiry. Acquisition is
//! `set_if_absent`, release and renewal only succeed while the key still
//! holds the caller's token, so a holder whose lock expired can never
//! release or extend a lock someone else has since taken.

use drover_config::StoreConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::provider::StoreProvider;

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn StoreProvider>,
    ttl: Duration,
    retry_interval: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn StoreProvider>, ttl: Duration, retry_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            retry_interval,
        }
    }

    pub fn from_config(store: Arc<dyn StoreProvider>, config: &StoreConfig) -> Self {
        Self::new(store, config.lock_ttl, config.lock_retry_interval)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire `key`, retrying until `timeout` has elapsed.
    ///
    /// A zero timeout makes exactly one attempt.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> StoreResult<LockGuard> {
        self.acquire_with_ttl(key, timeout, self.ttl).await
    }

    pub async fn acquire_with_ttl(
        &self,
        key: &str,
        timeout: Duration,
        ttl: Duration,
    ) -> StoreResult<LockGuard> {
        self.acquire_until(key, Some(Instant::now() + timeout), ttl)
            .await
    }

    /// Wait for `key` for as long as it takes
    pub async fn acquire_indefinitely(&self, key: &str) -> StoreResult<LockGuard> {
        self.acquire_until(key, None, self.ttl).await
    }

    /// Single attempt; `None` when the lock is held elsewhere
    pub async fn try_acquire(&self, key: &str) -> StoreResult<Option<LockGuard>> {
        match self.acquire(key, Duration::ZERO).await {
            Ok(guard) => Ok(Some(guard)),
            Err(StoreError::LockTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn acquire_until(
        &self,
        key: &str,
        deadline: Option<Instant>,
        ttl: Duration,
    ) -> StoreResult<LockGuard> {
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();

        loop {
            if self.store.set_if_absent(key, token.as_bytes(), ttl).await? {
                debug!(key, "Acquired lock");
                return Ok(LockGuard {
                    store: self.store.clone(),
                    key: key.to_string(),
                    token,
                    ttl,
                    released: false,
                });
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout {
                            key: key.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    self.retry_interval.min(deadline - now)
                }
                None => self.retry_interval,
            };
            sleep(pause).await;
        }
    }
}

/// A held lock. Dropping it releases the lock in the background.
pub struct LockGuard {
    store: Arc<dyn StoreProvider>,
    key: String,
    token: String,
    ttl: Duration,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Push the expiry out by one ttl. `false` means the lock was lost.
    pub async fn renew(&self) -> StoreResult<bool> {
        self.store
            .refresh_if_equals(&self.key, self.token.as_bytes(), self.ttl)
            .await
    }

    pub async fn is_held(&self) -> StoreResult<bool> {
        Ok(self.store.get(&self.key).await?.as_deref() == Some(self.token.as_bytes()))
    }

    /// Release now. `false` means the lock had already expired.
    pub async fn release(mut self) -> StoreResult<bool> {
        self.released = true;
        let released = self
            .store
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await?;
        if !released {
            warn!(key = %self.key, "Lock expired before release");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lock dropped outside a runtime, leaving it to expire");
            return;
        };
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.delete_if_equals(&key, token.as_bytes()).await {
                warn!(key = %key, "Failed to release dropped lock: {}", e);
            }
        });
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish()
    }
}

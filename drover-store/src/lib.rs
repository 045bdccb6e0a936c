//! Shared store for Drover
//!
//! Every cross-process coordination primitive the engine relies on lives
//! behind [`StoreProvider`]: queues, hashes, multi-op transactions,
//! compare-and-set with expiry, pub/sub and the server clock. Distributed
//! locks are built on top of those primitives in [`lock`].

pub mod error;
pub mod factory;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod provider;
#[cfg(feature = "redis")]
pub mod redis;

pub use error::{StoreError, StoreResult};
pub use factory::connect;
pub use keys::KeySpace;
pub use lock::{LockGuard, LockManager};
pub use memory::InMemoryStore;
pub use provider::{StoreOp, StoreProvider, Subscription};
#[cfg(feature = "redis")]
pub use redis::RedisStore;

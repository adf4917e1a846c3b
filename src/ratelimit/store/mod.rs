//! Counter backends for the rate limiter.
//!
//! All backends answer the same question: "record one more request for this
//! key and tell me how many fall inside the current window". Each `hit` is a
//! single atomic step per key; callers never read and then write.

pub mod local;
pub mod memory;
pub mod redis;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

pub use self::local::LocalStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Outcome of recording one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Requests counted in the current window, this one included
    pub count: u64,
    /// Time until the window resets
    pub reset_in: Duration,
}

/// A rate-limit counter backend
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Count one request for `key` in a window of `window`
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError>;

    /// Drop keys whose window has passed and return how many went. Backends
    /// that expire keys themselves keep the default.
    fn cleanup_expired(&self) -> usize {
        0
    }

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Release backend resources. Later hits fail with `Unavailable`.
    async fn close(&self) -> Result<(), StoreError>;
}

//! Redis-backed fixed-window counters.
//!
//! # Algorithm
//!
//! One Lua script per hit, executed atomically by the server:
//! 1. `INCR` the key
//! 2. On the first increment of a window, `PEXPIRE` it to the window length
//! 3. Return the count and the remaining TTL
//!
//! A key that somehow lost its TTL gets one re-applied so a window can never
//! stick forever.

use super::{Hit, RateStore};
use crate::error::StoreError;
use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const FIXED_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Shared counter store
pub struct RedisStore {
    conn_manager: ConnectionManager,
    script: Script,
    timeout: Duration,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connect to `redis_url`. The connection attempt and every later
    /// operation are bounded by `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let conn_manager = bounded(timeout, async {
            ConnectionManager::new(client).await.map_err(StoreError::from)
        })
        .await?;

        info!("Connected to Redis rate limit store");

        Ok(Self {
            conn_manager,
            script: Script::new(FIXED_WINDOW_SCRIPT),
            timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("redis store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Run `fut` with a deadline, mapping expiry to `StoreError::Timeout`
async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}

#[async_trait]
impl RateStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        self.ensure_open()?;

        let mut conn = self.conn_manager.clone();
        let window_ms = window.as_millis() as u64;

        let (count, ttl_ms): (i64, i64) = bounded(self.timeout, async {
            self.script
                .key(key)
                .arg(window_ms)
                .invoke_async(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await?;

        if count < 1 {
            return Err(StoreError::Protocol(format!("non-positive count {}", count)));
        }

        debug!(key = %key, count = count, ttl_ms = ttl_ms, "Redis rate limit hit");

        Ok(Hit {
            count: count as u64,
            reset_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.ensure_open()?;

        let mut conn = self.conn_manager.clone();
        let pong: String = bounded(self.timeout, async {
            ::redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply: {}", pong)))
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Redis rate limit store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    async fn test_unreachable_redis_times_out_or_fails() {
        // Nothing listens on port 1; the connect must fail fast either way
        let started = std::time::Instant::now();
        let result = RedisStore::connect("redis://127.0.0.1:1", Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_fixed_window_counts() {
        let store = RedisStore::connect("redis://127.0.0.1:6379", Duration::from_millis(200))
            .await
            .unwrap();
        let key = format!("test:ratelimit:{}", uuid::Uuid::new_v4());

        for expected in 1..=3 {
            let hit = store.hit(&key, Duration::from_secs(60)).await.unwrap();
            assert_eq!(hit.count, expected);
            assert!(hit.reset_in <= Duration::from_secs(60));
        }

        store.health_check().await.unwrap();
        store.close().await.unwrap();
        assert!(store.hit(&key, Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_concurrent_hits_are_atomic() {
        let store = std::sync::Arc::new(
            RedisStore::connect("redis://127.0.0.1:6379", Duration::from_millis(500))
                .await
                .unwrap(),
        );
        let key = format!("test:ratelimit:{}", uuid::Uuid::new_v4());

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.hit(&key, Duration::from_secs(60)).await.unwrap().count })
            })
            .collect();

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u64>>());
    }
}

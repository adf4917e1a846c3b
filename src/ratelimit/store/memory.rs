//! In-process fixed-window counter store

use super::{Hit, RateStore};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Fixed-window counters with the same semantics as the shared store:
/// the first hit of a window sets its expiry, later hits only increment.
/// The DashMap entry guard makes each hit atomic per key.
///
/// The store can be marked unreachable to exercise the limiter's
/// fail-open path.
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
    reachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage (`false`) or recovery (`true`)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current count for a key, if its window is live
    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters
            .get(key)
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.count)
    }

    /// Number of keys held, expired or not
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unreachable".to_string()));
        }

        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + window,
        });

        let counter = entry.value_mut();
        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + window;
        }
        counter.count += 1;

        Ok(Hit {
            count: counter.count,
            reset_in: counter.expires_at.saturating_duration_since(now),
        })
    }

    fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.counters.retain(|_, counter| {
            let live = counter.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        debug!(removed = removed, "Cleaned up expired rate limit counters");
        removed
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unreachable".to_string()))
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.reachable.store(false, Ordering::SeqCst);
        self.counters.clear();
        Ok(())
    }
}

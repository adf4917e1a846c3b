//! Tiered fixed-window rate limiting.
//!
//! # Data Flow
//! ```text
//! check(policy, identity)
//!     → key = "ratelimit:{policy}:{identity}"
//!     → store.hit(key, window)          (one atomic step per key)
//!     → count <= max_requests  → Admit { remaining, reset_at }
//!     → count >  max_requests  → Deny { retry_after = window }
//!     → store error            → FailOpen (admitted, logged)
//! ```
//!
//! # Design Decisions
//! - Fixed window, not sliding: bursts straddling a window boundary can reach
//!   twice the limit. Accepted imprecision.
//! - Denied requests still count. A key stays saturated until its window
//!   expires.
//! - The backend is chosen once in [`RateLimiter::connect`]; a shared store
//!   that fails later is never swapped for the local one, requests are simply
//!   admitted while it is down.
//! - In-process stores are swept for expired keys on an interval, so rotating
//!   anonymous identities cannot grow them without bound.

pub mod identity;
pub mod policy;
pub mod store;

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::observability::MetricsCollector;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use identity::{ClientIdentity, IdentityResolver};
pub use policy::{PolicyResolver, RateLimitPolicy, DEFAULT_POLICY};
pub use store::{Hit, LocalStore, MemoryStore, RateStore, RedisStore};

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Admit {
        limit: u64,
        remaining: u64,
        /// Unix timestamp (seconds) at which the window resets
        reset_at: i64,
    },
    Deny {
        limit: u64,
        /// Seconds the client should wait; always the policy window
        retry_after: u64,
    },
    /// The backend failed; the request is admitted without enforcement
    FailOpen,
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, RateDecision::Deny { .. })
    }
}

/// Policy-driven counter keyed by (policy, client identity)
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
    policies: IndexMap<String, RateLimitPolicy>,
    enabled: bool,
    metrics: Option<Arc<MetricsCollector>>,
    cleanup: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Create a limiter over an explicit backend
    pub fn new(store: Arc<dyn RateStore>, policies: Vec<RateLimitPolicy>) -> Self {
        let mut by_name: IndexMap<String, RateLimitPolicy> = policies
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        if !by_name.contains_key(DEFAULT_POLICY) {
            by_name.insert(
                DEFAULT_POLICY.to_string(),
                RateLimitPolicy::new(DEFAULT_POLICY, 60, 60),
            );
        }

        Self {
            store,
            policies: by_name,
            enabled: true,
            metrics: None,
            cleanup: None,
        }
    }

    /// Select the backend from configuration: the shared store when a URL is
    /// configured and answers a health check, otherwise the local store.
    pub async fn connect(config: &RateLimitConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.store_timeout_ms);
        let mut shared: Option<Arc<dyn RateStore>> = None;

        if let Some(url) = &config.redis_url {
            match RedisStore::connect(url, timeout).await {
                Ok(redis) => match redis.health_check().await {
                    Ok(()) => shared = Some(Arc::new(redis)),
                    Err(e) => warn!(error = %e, "Redis health check failed, using local rate limit store"),
                },
                Err(e) => warn!(error = %e, "Redis unreachable, using local rate limit store"),
            }
        }

        let store = match shared {
            Some(store) => store,
            None => match &config.local_store_dir {
                Some(dir) => Arc::new(LocalStore::with_dir(dir)?) as Arc<dyn RateStore>,
                None => Arc::new(LocalStore::in_memory()) as Arc<dyn RateStore>,
            },
        };

        info!(backend = store.name(), "Rate limiter initialized");

        let cleanup = spawn_cleanup_task(&store, Duration::from_secs(config.cleanup_interval_secs));

        let mut limiter = Self::new(store, policy::policies_from_config(&config.policies));
        limiter.enabled = config.enabled;
        limiter.cleanup = Some(cleanup);
        Ok(limiter)
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Turn enforcement on or off
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The named policy, or `default` for unknown names
    pub fn policy(&self, name: &str) -> &RateLimitPolicy {
        self.policies
            .get(name)
            .or_else(|| self.policies.get(DEFAULT_POLICY))
            .unwrap_or_else(|| &self.policies[0])
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn store(&self) -> Arc<dyn RateStore> {
        self.store.clone()
    }

    /// Count one request for `identity` under `policy_name`
    pub async fn check(&self, policy_name: &str, identity: &str) -> RateDecision {
        let policy = self.policy(policy_name);

        if !self.enabled {
            return RateDecision::Admit {
                limit: policy.max_requests,
                remaining: policy.max_requests,
                reset_at: chrono::Utc::now().timestamp() + policy.window_secs as i64,
            };
        }

        let key = format!("ratelimit:{}:{}", policy.name, identity);

        let hit = match self.store.hit(&key, policy.window()).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(
                    backend = self.store.name(),
                    policy = %policy.name,
                    error = %e,
                    "Rate limit backend failed, admitting request"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_rate_limit_fail_open();
                }
                return RateDecision::FailOpen;
            }
        };

        if hit.count > policy.max_requests {
            warn!(
                policy = %policy.name,
                identity = %identity,
                count = hit.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_rate_limit_denied();
            }
            return RateDecision::Deny {
                limit: policy.max_requests,
                retry_after: policy.window_secs,
            };
        }

        debug!(
            policy = %policy.name,
            identity = %identity,
            count = hit.count,
            limit = policy.max_requests,
            "Request within rate limit"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit_admitted();
        }

        RateDecision::Admit {
            limit: policy.max_requests,
            remaining: policy.max_requests - hit.count,
            reset_at: chrono::Utc::now().timestamp() + hit.reset_in.as_secs_f64().ceil() as i64,
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if let Some(cleanup) = &self.cleanup {
            cleanup.abort();
        }
        self.store.close().await?;
        Ok(())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}

/// Sweep expired keys from `store` every `period`. The task holds only a weak
/// reference and exits once the store is dropped.
pub fn spawn_cleanup_task(store: &Arc<dyn RateStore>, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(store) = weak.upgrade() else {
                break;
            };
            let removed = store.cleanup_expired();
            if removed > 0 {
                debug!(backend = store.name(), removed = removed, "Swept expired rate limit keys");
            }
        }
    })
}

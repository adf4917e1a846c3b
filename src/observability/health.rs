//! Health check reporting

use crate::ratelimit::RateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Health status
    pub status: HealthStatus,

    /// Optional message
    pub message: Option<String>,

    /// Response time in milliseconds
    pub response_time_ms: Option<u64>,
}

/// Overall system health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Overall status
    pub status: HealthStatus,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Component health checks
    pub components: Vec<ComponentHealth>,

    /// Timestamp
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
struct CachedHealth {
    result: SystemHealth,
    cached_at: Instant,
}

/// Health checker with caching
pub struct HealthChecker {
    start_time: Instant,
    rate_store: Option<Arc<dyn RateStore>>,
    cached_result: Arc<RwLock<Option<CachedHealth>>>,
    cache_ttl: Duration,
    probe_timeout: Duration,
}

impl HealthChecker {
    /// Create a new health checker with a 5-second cache TTL
    pub fn new() -> Self {
        Self::with_cache_ttl(Duration::from_secs(5))
    }

    pub fn with_cache_ttl(cache_ttl: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            rate_store: None,
            cached_result: Arc::new(RwLock::new(None)),
            cache_ttl,
            probe_timeout: Duration::from_secs(1),
        }
    }

    /// Set the rate limit backend to probe
    pub fn with_rate_store(mut self, store: Arc<dyn RateStore>) -> Self {
        self.rate_store = Some(store);
        self
    }

    /// Check overall system health with caching
    pub async fn check_health(&self) -> SystemHealth {
        {
            let cached = self.cached_result.read().await;
            if let Some(cached_health) = &*cached {
                if cached_health.cached_at.elapsed() < self.cache_ttl {
                    debug!("Returning cached health check result");
                    return cached_health.result.clone();
                }
            }
        }

        debug!("Performing fresh health check");
        self.check_health_fresh().await
    }

    /// Force refresh health check (bypass cache)
    pub async fn check_health_fresh(&self) -> SystemHealth {
        let components = vec![self.check_rate_store().await];

        // A down rate store degrades the gateway but never takes it down:
        // checks fail open.
        let status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        let health = SystemHealth {
            status,
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
            timestamp: chrono::Utc::now().timestamp(),
        };

        let mut cached = self.cached_result.write().await;
        *cached = Some(CachedHealth {
            result: health.clone(),
            cached_at: Instant::now(),
        });

        health
    }

    async fn check_rate_store(&self) -> ComponentHealth {
        let Some(store) = &self.rate_store else {
            return ComponentHealth {
                name: "rate_limit_store".to_string(),
                status: HealthStatus::Degraded,
                message: Some("Not configured".to_string()),
                response_time_ms: None,
            };
        };

        let start = Instant::now();
        let name = format!("rate_limit_store:{}", store.name());

        match tokio::time::timeout(self.probe_timeout, store.health_check()).await {
            Ok(Ok(())) => ComponentHealth {
                name,
                status: HealthStatus::Healthy,
                message: Some("Store operational".to_string()),
                response_time_ms: Some(start.elapsed().as_millis() as u64),
            },
            Ok(Err(e)) => ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                message: Some(format!("Store error: {}", e)),
                response_time_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                message: Some("Health check timeout".to_string()),
                response_time_ms: Some(self.probe_timeout.as_millis() as u64),
            },
        }
    }

    /// Time since the checker was created; answering at all means alive
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Ready unless a component is unhealthy enough to take the gateway down
    pub async fn readiness(&self) -> bool {
        let health = self.check_health().await;
        health.status != HealthStatus::Unhealthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

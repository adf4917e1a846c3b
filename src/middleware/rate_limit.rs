//! Rate limiting middleware for API protection

use super::{Flow, Middleware, Stage};
use crate::http::{ApiResponse, RequestContext};
use crate::observability::{MetricsCollector, RejectReason};
use crate::ratelimit::{IdentityResolver, PolicyResolver, RateDecision, RateLimiter};
use async_trait::async_trait;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::json;
use std::sync::Arc;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Resolves the policy and client for a request and charges one slot
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    policies: PolicyResolver,
    identities: IdentityResolver,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>, policies: PolicyResolver, identities: IdentityResolver) -> Self {
        Self {
            limiter,
            policies,
            identities,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn stage(&self) -> Stage {
        Stage::RateLimit
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let policy = self.policies.resolve(ctx.path());
        let identity = self.identities.resolve(ctx);

        match self.limiter.check(policy, &identity.to_string()).await {
            RateDecision::Admit { limit, remaining, reset_at } => {
                ctx.stage_header(LIMIT_HEADER, HeaderValue::from(limit));
                ctx.stage_header(REMAINING_HEADER, HeaderValue::from(remaining));
                ctx.stage_header(RESET_HEADER, HeaderValue::from(reset_at));
                Flow::Continue
            }
            RateDecision::FailOpen => Flow::Continue,
            RateDecision::Deny { limit, retry_after } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(RejectReason::RateLimited);
                }

                let body = json!({
                    "error": "Rate limit exceeded",
                    "message": format!(
                        "Too many requests. Limit is {} per {} seconds; try again in {} seconds.",
                        limit,
                        self.limiter.policy(policy).window_secs,
                        retry_after
                    ),
                    "retry_after": retry_after,
                });

                Flow::ShortCircuit(
                    ApiResponse::json(StatusCode::TOO_MANY_REQUESTS, body)
                        .with_header(RETRY_AFTER, HeaderValue::from(retry_after))
                        .with_header(LIMIT_HEADER, HeaderValue::from(limit))
                        .with_header(REMAINING_HEADER, HeaderValue::from(0u64)),
                )
            }
        }
    }
}

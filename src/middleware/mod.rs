//! Middleware components for request processing
//!
//! Each middleware inspects or rewrites the [`RequestContext`] and either lets
//! the request continue or answers it directly. The deployment order is fixed:
//!
//! ```text
//! Security → RateLimit → Auth → handler
//! ```
//!
//! Hostile input is rejected before it consumes a rate-limit slot.

pub mod auth;
pub mod chain;
pub mod rate_limit;
pub mod sanitizer;
pub mod security;

use crate::http::{ApiResponse, RequestContext};
use async_trait::async_trait;

pub use auth::{AuthError, AuthMiddleware};
pub use chain::MiddlewareChain;
pub use rate_limit::RateLimitMiddleware;
pub use sanitizer::Sanitizer;
pub use security::{AttackKind, CorsPolicy, SecurityMiddleware};

/// Outcome of one middleware step
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Stop the chain and answer with this response; the handler never runs
    ShortCircuit(ApiResponse),
}

/// Pipeline position of a middleware, used for per-route bypass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Security,
    RateLimit,
    Auth,
    Custom,
}

/// A step of the request pipeline
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    async fn handle(&self, ctx: &mut RequestContext) -> Flow;
}

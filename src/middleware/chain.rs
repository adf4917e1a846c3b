//! Ordered middleware list, fixed at startup

use super::{Flow, Middleware, Stage};
use crate::http::RequestContext;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The deployment order: security, then rate limiting, then auth
    pub fn standard(
        security: Arc<dyn Middleware>,
        rate_limit: Arc<dyn Middleware>,
        auth: Arc<dyn Middleware>,
    ) -> Self {
        Self::new().with(security).with(rate_limit).with(auth)
    }

    /// Append a middleware
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run every middleware in order, skipping `skip` stages. The first
    /// short-circuit wins.
    pub async fn run(&self, ctx: &mut RequestContext, skip: &[Stage]) -> Flow {
        for middleware in &self.middleware {
            if skip.contains(&middleware.stage()) {
                debug!(middleware = middleware.name(), "Skipping middleware for route");
                continue;
            }

            if let Flow::ShortCircuit(response) = middleware.handle(ctx).await {
                debug!(
                    middleware = middleware.name(),
                    status = response.status().as_u16(),
                    "Middleware short-circuited request"
                );
                return Flow::ShortCircuit(response);
            }
        }

        Flow::Continue
    }
}

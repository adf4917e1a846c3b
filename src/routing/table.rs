//! Route table: registration and lookup.

use super::pattern::PathPattern;
use crate::error::RouteError;
use crate::http::{ApiResponse, Method, RequestContext};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a business handler returns; errors become a generic 500
pub type HandlerResult = anyhow::Result<ApiResponse>;

/// Business logic invoked once the middleware chain lets a request through
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: RequestContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Per-route options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOptions {
    /// Leave the authentication stage out of this route's chain
    pub skip_auth: bool,
}

impl RouteOptions {
    pub fn skip_auth() -> Self {
        Self { skip_auth: true }
    }
}

/// A registered route
pub struct RouteEntry {
    method: Method,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
    options: RouteOptions,
}

impl RouteEntry {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    pub fn options(&self) -> RouteOptions {
        self.options
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("options", &self.options)
            .finish()
    }
}

/// Result of a successful lookup
#[derive(Debug)]
pub struct MatchResult<'a> {
    pub route: &'a RouteEntry,
    pub path_params: HashMap<String, String>,
}

/// Registered routes. Built at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern` and store the route
    pub fn register<H>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
        options: RouteOptions,
    ) -> Result<(), RouteError>
    where
        H: Handler + 'static,
    {
        let pattern = PathPattern::compile(pattern)?;
        self.routes.push(RouteEntry {
            method,
            pattern,
            handler: Arc::new(handler),
            options,
        });
        Ok(())
    }

    /// Find the most specific route accepting `method` and `path`.
    /// Equally specific candidates resolve to the one registered first.
    pub fn match_route(&self, method: Method, path: &str) -> Option<MatchResult<'_>> {
        let mut best: Option<MatchResult<'_>> = None;

        for route in self.routes.iter().filter(|r| r.method == method) {
            let Some(path_params) = route.pattern.captures(path) else {
                continue;
            };

            let replace = match &best {
                None => true,
                Some(current) => {
                    route.pattern.specificity_cmp(&current.route.pattern) == Ordering::Greater
                }
            };

            if replace {
                best = Some(MatchResult { route, path_params });
            }
        }

        best
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(name: &'static str) -> impl Handler {
        move |_ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "route": name })))
        }
    }

    async fn route_name(table: &RouteTable, method: Method, path: &str) -> Option<String> {
        let matched = table.match_route(method, path)?;
        let ctx = RequestContext::builder(method, path).build();
        let response = matched.route.handler().call(ctx).await.unwrap();
        response.body_json()?["route"].as_str().map(str::to_string)
    }

    #[tokio::test]
    async fn test_literal_registered_after_param_is_reachable() {
        let mut table = RouteTable::new();
        table
            .register(Method::Get, "/opportunities/:id", named("by_id"), RouteOptions::default())
            .unwrap();
        table
            .register(Method::Get, "/opportunities/pipeline", named("pipeline"), RouteOptions::default())
            .unwrap();

        assert_eq!(
            route_name(&table, Method::Get, "/opportunities/pipeline").await.as_deref(),
            Some("pipeline")
        );
        assert_eq!(
            route_name(&table, Method::Get, "/opportunities/17").await.as_deref(),
            Some("by_id")
        );
    }

    #[tokio::test]
    async fn test_equal_specificity_first_registration_wins() {
        let mut table = RouteTable::new();
        table
            .register(Method::Get, "/leads/:id", named("first"), RouteOptions::default())
            .unwrap();
        table
            .register(Method::Get, "/leads/:lead_id", named("second"), RouteOptions::default())
            .unwrap();

        assert_eq!(route_name(&table, Method::Get, "/leads/1").await.as_deref(), Some("first"));
    }

    #[test]
    fn test_method_must_match() {
        let mut table = RouteTable::new();
        table
            .register(Method::Post, "/leads", named("create"), RouteOptions::default())
            .unwrap();

        assert!(table.match_route(Method::Get, "/leads").is_none());
        assert!(table.match_route(Method::Post, "/leads").is_some());
    }

    #[test]
    fn test_no_match_and_trailing_slash() {
        let mut table = RouteTable::new();
        table
            .register(Method::Get, "/leads", named("list"), RouteOptions::default())
            .unwrap();

        assert!(table.match_route(Method::Get, "/leads/").is_none());
        assert!(table.match_route(Method::Get, "/contacts").is_none());
    }

    #[test]
    fn test_path_params_and_options() {
        let mut table = RouteTable::new();
        table
            .register(Method::Delete, "/leads/:id", named("delete"), RouteOptions::skip_auth())
            .unwrap();

        let matched = table.match_route(Method::Delete, "/leads/abc").unwrap();
        assert_eq!(matched.path_params["id"], "abc");
        assert!(matched.route.options().skip_auth);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut table = RouteTable::new();
        let result = table.register(Method::Get, "leads", named("x"), RouteOptions::default());
        assert!(result.is_err());
        assert!(table.is_empty());
    }
}

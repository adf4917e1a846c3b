//! Request dispatch: route lookup, middleware chain, handler invocation.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → RouteTable::match_route        (404 when nothing matches)
//!     → path params copied into the context
//!     → MiddlewareChain::run           (auth stage left out for skip_auth routes)
//!     → Handler::call                  (errors and panics → 500)
//!     → staged headers merged
//! ```

use crate::http::{ApiResponse, RequestContext};
use crate::middleware::{Flow, MiddlewareChain, Stage};
use crate::observability::{MetricsCollector, RejectReason};
use crate::routing::RouteTable;
use axum::http::StatusCode;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Ties the route table and the middleware chain together
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    chain: MiddlewareChain,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(routes: RouteTable, chain: MiddlewareChain) -> Self {
        Self {
            routes: Arc::new(routes),
            chain,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run one request through the pipeline
    pub async fn dispatch(&self, ctx: RequestContext) -> ApiResponse {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
        );

        async move {
            let start = Instant::now();
            let response = self.process(ctx).await;

            info!(
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_request(response.status(), start.elapsed());
            }

            response
        }
        .instrument(span)
        .await
    }

    async fn process(&self, mut ctx: RequestContext) -> ApiResponse {
        let Some(matched) = self.routes.match_route(ctx.method(), ctx.path()) else {
            debug!("No route matched");
            self.record_rejection(RejectReason::NotFound);
            return ApiResponse::error(StatusCode::NOT_FOUND, "Not found");
        };

        let route = matched.route;
        ctx.set_path_params(matched.path_params);

        let skip: &[Stage] = if route.options().skip_auth { &[Stage::Auth] } else { &[] };

        if let Flow::ShortCircuit(mut response) = self.chain.run(&mut ctx, skip).await {
            response.merge_headers(ctx.take_staged_headers());
            return response;
        }

        let staged = ctx.take_staged_headers();
        let handler = route.handler();

        let mut response = match AssertUnwindSafe(handler.call(ctx)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(route = %route.pattern().as_str(), error = %format!("{:#}", e), "Handler failed");
                self.record_rejection(RejectReason::HandlerError);
                ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            Err(panic) => {
                error!(
                    route = %route.pattern().as_str(),
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                self.record_rejection(RejectReason::HandlerError);
                ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        response.merge_headers(staged);
        response
    }

    fn record_rejection(&self, reason: RejectReason) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(reason);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::middleware::Middleware;
    use crate::routing::RouteOptions;
    use async_trait::async_trait;
    use axum::http::{HeaderName, HeaderValue};
    use serde_json::json;

    struct Deny(Stage);

    #[async_trait]
    impl Middleware for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn stage(&self) -> Stage {
            self.0
        }

        async fn handle(&self, ctx: &mut RequestContext) -> Flow {
            ctx.stage_header(HeaderName::from_static("x-seen"), HeaderValue::from_static("1"));
            Flow::ShortCircuit(ApiResponse::error(StatusCode::UNAUTHORIZED, "denied"))
        }
    }

    fn table() -> RouteTable {
        let mut routes = RouteTable::new();
        routes
            .register(
                Method::Get,
                "/leads/:id",
                |ctx: RequestContext| async move {
                    Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "id": ctx.path_param("id") })))
                },
                RouteOptions::default(),
            )
            .unwrap();
        routes
            .register(
                Method::Get,
                "/open",
                |_ctx: RequestContext| async move { Ok::<_, anyhow::Error>(ApiResponse::ok(json!({}))) },
                RouteOptions::skip_auth(),
            )
            .unwrap();
        routes
            .register(
                Method::Get,
                "/fail",
                |_ctx: RequestContext| async move {
                    Err::<ApiResponse, _>(anyhow::anyhow!("database exploded"))
                },
                RouteOptions::skip_auth(),
            )
            .unwrap();
        routes
            .register(
                Method::Get,
                "/panic",
                |_ctx: RequestContext| async move {
                    if true {
                        panic!("handler bug");
                    }
                    Ok::<_, anyhow::Error>(ApiResponse::ok(json!({})))
                },
                RouteOptions::skip_auth(),
            )
            .unwrap();
        routes
    }

    #[tokio::test]
    async fn test_not_found() {
        let dispatcher = Dispatcher::new(table(), MiddlewareChain::new());
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/nope").build())
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body_json().unwrap(), &json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn test_method_mismatch_is_not_found() {
        let dispatcher = Dispatcher::new(table(), MiddlewareChain::new());
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Delete, "/leads/1").build())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_path_params_reach_handler() {
        let dispatcher = Dispatcher::new(table(), MiddlewareChain::new());
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/leads/42").build())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_json().unwrap(), &json!({"id": "42"}));
    }

    #[tokio::test]
    async fn test_short_circuit_keeps_staged_headers() {
        let chain = MiddlewareChain::new().with(Arc::new(Deny(Stage::Auth)));
        let dispatcher = Dispatcher::new(table(), chain);
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/leads/1").build())
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.header_str("x-seen"), Some("1"));
    }

    #[tokio::test]
    async fn test_skip_auth_drops_only_auth_stage() {
        let dispatcher = Dispatcher::new(
            table(),
            MiddlewareChain::new().with(Arc::new(Deny(Stage::Auth))),
        );
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/open").build())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let dispatcher = Dispatcher::new(
            table(),
            MiddlewareChain::new().with(Arc::new(Deny(Stage::RateLimit))),
        );
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/open").build())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_handler_error_is_generic_500() {
        let metrics = Arc::new(MetricsCollector::new());
        let dispatcher = Dispatcher::new(table(), MiddlewareChain::new()).with_metrics(metrics.clone());
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/fail").build())
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json().unwrap(), &json!({"error": "Internal server error"}));
        assert_eq!(metrics.rejections(RejectReason::HandlerError), 1);
        assert_eq!(metrics.get_metrics().responses_5xx, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_generic_500() {
        let dispatcher = Dispatcher::new(table(), MiddlewareChain::new());
        let response = dispatcher
            .dispatch(RequestContext::builder(Method::Get, "/panic").build())
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_json().unwrap(), &json!({"error": "Internal server error"}));
    }
}

//! HTTP transport and gateway assembly
//!
//! Every inbound request goes through a single axum fallback handler that
//! converts it into a [`RequestContext`] and hands it to the [`Dispatcher`].
//! Routing, middleware and response shaping all happen there; axum only
//! provides the socket, body collection and transport-level tracing.

use crate::auth::TokenVerifier;
use crate::config::{Config, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::http::{ApiResponse, Method, RequestContext};
use crate::middleware::{
    AuthMiddleware, CorsPolicy, MiddlewareChain, RateLimitMiddleware, SecurityMiddleware,
};
use crate::observability::{HealthChecker, HealthStatus, MetricsCollector, RejectReason};
use crate::ratelimit::{IdentityResolver, PolicyResolver, RateLimiter};
use crate::routing::{RouteOptions, RouteTable};
use crate::shutdown::ShutdownNotifier;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::ORIGIN, HeaderValue, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use serde_json::json;
use tracing::{debug, info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Server state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsCollector>,
    pub cors: Arc<CorsPolicy>,
    pub max_body_bytes: usize,
}

/// Create the axum application: one fallback that feeds the dispatcher
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_request(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    if parts.method == HttpMethod::OPTIONS {
        let origin = parts.headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        if let Some(response) = state.cors.preflight(origin) {
            debug!(path = %parts.uri.path(), origin = ?origin, "Answered CORS preflight");
            return into_http(response);
        }
    }

    // Methods outside the routable set can never match a route
    let Ok(method) = parts.method.as_str().parse::<Method>() else {
        state.metrics.record_rejection(RejectReason::NotFound);
        return into_http(ApiResponse::error(StatusCode::NOT_FOUND, "Not found"));
    };

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "Failed to read request body");
            state.metrics.record_rejection(RejectReason::PayloadTooLarge);
            return into_http(ApiResponse::error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
            ));
        }
    };

    let ctx = RequestContext::from_parts(
        method,
        parts.uri.path(),
        parts.uri.query(),
        parts.headers,
        &bytes,
        remote_addr,
    );

    into_http(state.dispatcher.dispatch(ctx).await)
}

fn into_http(response: ApiResponse) -> Response {
    let (status, headers, body) = response.finalize();
    (status, headers, body).into_response()
}

/// Register `GET /health`, `/health/liveness`, `/health/readiness` and
/// `GET /metrics`, all without authentication
pub fn register_builtin_routes(
    routes: &mut RouteTable,
    health: Arc<HealthChecker>,
    metrics: Arc<MetricsCollector>,
) -> Result<()> {
    let checker = health.clone();
    routes.register(
        Method::Get,
        "/health",
        move |_ctx: RequestContext| {
            let health = checker.clone();
            async move {
                let report = health.check_health().await;
                let status = if report.status == HealthStatus::Unhealthy {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                };
                Ok::<_, anyhow::Error>(ApiResponse::json(status, serde_json::to_value(report)?))
            }
        },
        RouteOptions::skip_auth(),
    )?;

    let checker = health.clone();
    routes.register(
        Method::Get,
        "/health/liveness",
        move |_ctx: RequestContext| {
            let uptime = checker.uptime();
            async move {
                Ok::<_, anyhow::Error>(ApiResponse::ok(json!({
                    "status": "alive",
                    "uptime_secs": uptime.as_secs(),
                })))
            }
        },
        RouteOptions::skip_auth(),
    )?;

    routes.register(
        Method::Get,
        "/health/readiness",
        move |_ctx: RequestContext| {
            let health = health.clone();
            async move {
                let ready = health.readiness().await;
                let status = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, anyhow::Error>(ApiResponse::json(status, json!({ "ready": ready })))
            }
        },
        RouteOptions::skip_auth(),
    )?;

    routes.register(
        Method::Get,
        "/metrics",
        move |_ctx: RequestContext| {
            let metrics = metrics.clone();
            async move {
                Ok::<_, anyhow::Error>(ApiResponse::raw(
                    StatusCode::OK,
                    metrics.export_prometheus(),
                    HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
                ))
            }
        },
        RouteOptions::skip_auth(),
    )?;

    Ok(())
}

/// A fully wired gateway: rate limiter, middleware chain and dispatcher
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    cors: Arc<CorsPolicy>,
    max_body_bytes: usize,
}

impl Gateway {
    /// Connect the configured rate store and wire everything together
    pub async fn from_config(config: &Config, routes: RouteTable) -> Result<Self> {
        let limiter = RateLimiter::connect(&config.rate_limit).await?;
        Self::with_limiter(config, routes, limiter)
    }

    /// Wire the gateway around an already constructed rate limiter
    pub fn with_limiter(config: &Config, mut routes: RouteTable, limiter: RateLimiter) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        let limiter = Arc::new(limiter.with_metrics(metrics.clone()));

        let health = Arc::new(HealthChecker::new().with_rate_store(limiter.store()));
        register_builtin_routes(&mut routes, health, metrics.clone())?;

        let security = SecurityMiddleware::from_config(&config.server, &config.security)
            .with_metrics(metrics.clone());
        let cors = Arc::new(security.cors().clone());
        let rate_limit = RateLimitMiddleware::new(
            limiter.clone(),
            PolicyResolver::new(config.rate_limit.rules.clone()),
            IdentityResolver::new(
                TokenVerifier::new(config.auth.jwt_secret.clone()),
                config.rate_limit.trust_forwarded_for,
            ),
        )
        .with_metrics(metrics.clone());
        let auth = AuthMiddleware::from_config(&config.auth)?.with_metrics(metrics.clone());

        let chain = MiddlewareChain::standard(Arc::new(security), Arc::new(rate_limit), Arc::new(auth));
        info!(middleware = ?chain.names(), routes = routes.len(), "Pipeline assembled");
        for route in routes.routes() {
            info!(
                method = %route.method(),
                pattern = %route.pattern().as_str(),
                skip_auth = route.options().skip_auth,
                "Route registered"
            );
        }

        let dispatcher = Dispatcher::new(routes, chain).with_metrics(metrics.clone());

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            limiter,
            metrics,
            cors,
            max_body_bytes: config.server.max_body_bytes,
        })
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// The axum application serving this gateway
    pub fn router(&self) -> Router {
        build_app(AppState {
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
            cors: self.cors.clone(),
            max_body_bytes: self.max_body_bytes,
        })
    }

    /// Serve until `shutdown` fires, then close the rate store
    pub async fn serve(self, config: &ServerConfig, shutdown: ShutdownNotifier) -> Result<()> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, backend = self.limiter.backend_name(), "Starting HTTP server");

        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(GatewayError::Io)?;

        info!("HTTP server stopped, closing rate limit store");
        self.limiter.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn app() -> Router {
        let metrics = Arc::new(MetricsCollector::new());
        let mut routes = RouteTable::new();
        register_builtin_routes(&mut routes, Arc::new(HealthChecker::new()), metrics.clone()).unwrap();

        build_app(AppState {
            dispatcher: Arc::new(Dispatcher::new(routes, MiddlewareChain::new())),
            metrics,
            cors: Arc::new(CorsPolicy::new(vec!["https://app.example.com".to_string()])),
            max_body_bytes: 16,
        })
    }

    #[tokio::test]
    async fn test_preflight_from_allowed_origin() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("OPTIONS")
                    .uri("/leads/42")
                    .header("Origin", "https://app.example.com")
                    .header("Access-Control-Request-Method", "GET")
                    .header("Access-Control-Request-Headers", "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert!(headers["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .contains("Authorization"));
        assert!(headers.get("content-type").is_none());
    }

    #[tokio::test]
    async fn test_preflight_from_unknown_origin_is_not_found() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("OPTIONS")
                    .uri("/leads/42")
                    .header("Origin", "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_liveness_and_readiness() {
        let response = app()
            .oneshot(HttpRequest::builder().uri("/health/liveness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // No rate store configured: degraded, which is still ready
        let response = app()
            .oneshot(HttpRequest::builder().uri("/health/readiness").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ready"], true);
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let response = app()
            .oneshot(HttpRequest::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("OPTIONS")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_body_over_limit_without_length_is_rejected() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/health")
                    .body(Body::from(vec![b'a'; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

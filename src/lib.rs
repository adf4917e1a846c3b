//! CRM Gateway - REST API gateway core for a legacy CRM data store
//!
//! This library provides the request-handling pipeline that sits in front of
//! the CRM's business controllers: routing, a normalized request/response
//! envelope, an ordered middleware chain and tiered rate limiting.
//!
//! ## Features
//!
//! - **Routing**: `:name` path parameters, most specific route wins
//! - **Security**: body size limit, attack-signature rejection, input sanitization
//! - **Rate Limiting**: fixed-window tiers over Redis with a local fallback, fail-open
//! - **Authentication**: HS256 bearer tokens with a public allow-list
//! - **Observability**: structured logging, Prometheus metrics and health checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crm_gateway::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file_with_env("config/default.toml")?;
//!
//!     let mut routes = RouteTable::new();
//!     routes.register(
//!         Method::Get,
//!         "/leads/:id",
//!         |ctx: RequestContext| async move {
//!             let id = ctx.path_param("id").unwrap_or_default().to_string();
//!             Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "id": id })))
//!         },
//!         RouteOptions::default(),
//!     )?;
//!
//!     let gateway = Gateway::from_config(&config, routes).await?;
//!     let shutdown = ShutdownCoordinator::new();
//!     gateway.serve(&config.server, shutdown.subscribe()).await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod middleware;
pub mod observability;
pub mod ratelimit;
pub mod routing;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use error::{GatewayError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{Claims, Identity, TokenVerifier};
    pub use crate::config::Config;
    pub use crate::dispatcher::Dispatcher;
    pub use crate::error::{GatewayError, Result};
    pub use crate::http::{ApiResponse, Method, RequestContext};
    pub use crate::middleware::{Flow, Middleware, MiddlewareChain, Stage};
    pub use crate::observability::{HealthChecker, MetricsCollector};
    pub use crate::ratelimit::{RateDecision, RateLimiter, RateStore};
    pub use crate::routing::{Handler, HandlerResult, RouteOptions, RouteTable};
    pub use crate::server::Gateway;
    pub use crate::shutdown::ShutdownCoordinator;
}

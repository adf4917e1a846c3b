//! CRM Gateway Server Binary
//!
//! Loads configuration, connects the rate limit store and serves the gateway
//! with a small set of demonstration controllers.

use crm_gateway::{
    config::Config,
    http::{ApiResponse, Method, RequestContext},
    observability::init_observability,
    routing::{RouteOptions, RouteTable},
    server::Gateway,
    shutdown::ShutdownCoordinator,
};
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());
    let config = Config::from_file_with_env(&config_path)?;

    init_observability(&config.logging.level, &config.logging.format);
    info!(path = %config_path, "Configuration loaded and validated");

    let routes = build_routes()?;
    let gateway = Gateway::from_config(&config, routes).await?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let notifier = shutdown.subscribe();
    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    gateway.serve(&config.server, notifier).await?;
    info!("CRM gateway shut down");
    Ok(())
}

/// Demonstration controllers standing in for the CRM's business modules.
/// Tokens are issued by the CRM's own login controller, not by this binary.
fn build_routes() -> anyhow::Result<RouteTable> {
    let mut routes = RouteTable::new();

    routes.register(
        Method::Get,
        "/leads",
        |ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({
                "data": [],
                "requested_by": ctx.identity().map(|i| i.id),
            })))
        },
        RouteOptions::default(),
    )?;

    routes.register(
        Method::Get,
        "/leads/:id",
        |ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "id": ctx.path_param("id") })))
        },
        RouteOptions::default(),
    )?;

    routes.register(
        Method::Get,
        "/opportunities/:id",
        |ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "id": ctx.path_param("id") })))
        },
        RouteOptions::default(),
    )?;

    routes.register(
        Method::Get,
        "/opportunities/pipeline",
        |_ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "stages": [] })))
        },
        RouteOptions::default(),
    )?;

    routes.register(
        Method::Post,
        "/track/:event",
        |ctx: RequestContext| async move {
            Ok::<_, anyhow::Error>(ApiResponse::json(
                StatusCode::ACCEPTED,
                json!({ "event": ctx.path_param("event"), "tracked": true }),
            ))
        },
        RouteOptions::skip_auth(),
    )?;

    routes.register(
        Method::Post,
        "/ai/chat",
        |ctx: RequestContext| async move {
            let message = ctx.body_str("message").unwrap_or_default().to_string();
            Ok::<_, anyhow::Error>(ApiResponse::ok(json!({ "reply": format!("Received: {}", message) })))
        },
        RouteOptions::default(),
    )?;

    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_login_controller_is_shipped() {
        let routes = build_routes().unwrap();
        assert!(routes.match_route(Method::Post, "/auth/login").is_none());
        assert!(routes.match_route(Method::Get, "/opportunities/pipeline").is_some());
    }
}

//! Authentication middleware

use super::{Flow, Middleware, Stage};
use crate::auth::{bearer_token, Identity, TokenVerifier};
use crate::config::AuthConfig;
use crate::error::{GatewayError, TokenError};
use crate::http::{ApiResponse, Method, RequestContext};
use crate::observability::{MetricsCollector, RejectReason};
use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bearer token authentication with a public allow-list
pub struct AuthMiddleware {
    verifier: TokenVerifier,
    public_routes: Vec<(Method, String)>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AuthMiddleware {
    /// Create new authentication middleware
    pub fn new(verifier: TokenVerifier, public_routes: Vec<(Method, String)>) -> Self {
        Self {
            verifier,
            public_routes,
            metrics: None,
        }
    }

    /// Build from configuration; public routes are `METHOD:path-prefix`
    pub fn from_config(config: &AuthConfig) -> Result<Self, GatewayError> {
        let public_routes = config
            .public_routes
            .iter()
            .map(|entry| parse_public_route(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(TokenVerifier::new(config.jwt_secret.clone()), public_routes))
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether `method path` is on the allow-list
    pub fn is_public(&self, method: Method, path: &str) -> bool {
        self.public_routes
            .iter()
            .any(|(m, prefix)| *m == method && path.starts_with(prefix.as_str()))
    }

    /// Verify the request's bearer token and return the caller's identity
    pub fn authenticate(&self, ctx: &RequestContext) -> Result<Identity, AuthError> {
        let header = ctx.header_line("authorization").ok_or(AuthError::MissingToken)?;
        let token = bearer_token(&header).ok_or(AuthError::InvalidHeader)?;

        let claims = self.verifier.verify(token)?;
        claims.identity().ok_or(AuthError::Token(TokenError::MissingClaims))
    }
}

fn parse_public_route(entry: &str) -> Result<(Method, String), GatewayError> {
    let (method, prefix) = entry.split_once(':').ok_or_else(|| {
        GatewayError::Config(format!("public route must be METHOD:/path, got '{}'", entry))
    })?;
    let method = method.parse::<Method>()?;
    Ok((method, prefix.to_string()))
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn stage(&self) -> Stage {
        Stage::Auth
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if self.is_public(ctx.method(), ctx.path()) {
            debug!(path = %ctx.path(), "Public route, skipping authentication");
            return Flow::Continue;
        }

        match self.authenticate(ctx) {
            Ok(identity) => {
                debug!(user = %identity.id, "Authentication successful");
                ctx.set_identity(&identity);
                Flow::Continue
            }
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id(),
                    path = %ctx.path(),
                    reason = %e,
                    "Authentication failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(RejectReason::Unauthorized);
                }
                Flow::ShortCircuit(ApiResponse::error(StatusCode::UNAUTHORIZED, e.to_string()))
            }
        }
    }
}

/// Authentication errors. The display text is the 401 response message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid authorization header format")]
    InvalidHeader,

    #[error("{}", token_message(.0))]
    Token(#[from] TokenError),
}

fn token_message(err: &TokenError) -> &'static str {
    match err {
        TokenError::InvalidSignature => "Invalid token signature",
        TokenError::Expired => "Token has expired",
        TokenError::NotYetValid => "Token is not yet valid",
        TokenError::MissingClaims => "Token is missing required claims",
        TokenError::Malformed | TokenError::UnsupportedAlgorithm(_) | TokenError::Signing(_) => {
            "Malformed token"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use secrecy::Secret;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(Secret::new("test-secret".to_string()))
    }

    fn middleware() -> AuthMiddleware {
        AuthMiddleware::new(verifier(), vec![(Method::Post, "/auth/login".to_string())])
    }

    async fn run(ctx: &mut RequestContext) -> Result<(), (StatusCode, String)> {
        match middleware().handle(ctx).await {
            Flow::Continue => Ok(()),
            Flow::ShortCircuit(r) => Err((
                r.status(),
                r.body_json().unwrap()["error"].as_str().unwrap().to_string(),
            )),
        }
    }

    #[tokio::test]
    async fn test_valid_token_attaches_identity() {
        let token = verifier()
            .issue(&Claims::new("7", Some("ada".to_string()), 3600))
            .unwrap();
        let mut ctx = RequestContext::builder(Method::Get, "/leads").bearer(&token).build();

        assert!(run(&mut ctx).await.is_ok());
        assert_eq!(
            ctx.identity(),
            Some(Identity { id: "7".to_string(), username: Some("ada".to_string()) })
        );
    }

    #[tokio::test]
    async fn test_missing_token() {
        let mut ctx = RequestContext::builder(Method::Get, "/leads").build();
        assert_eq!(
            run(&mut ctx).await,
            Err((StatusCode::UNAUTHORIZED, "No token provided".to_string()))
        );
    }

    #[tokio::test]
    async fn test_non_bearer_header() {
        let mut ctx = RequestContext::builder(Method::Get, "/leads")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .build();
        assert_eq!(
            run(&mut ctx).await,
            Err((StatusCode::UNAUTHORIZED, "Invalid authorization header format".to_string()))
        );
    }

    #[tokio::test]
    async fn test_expired_token() {
        let token = verifier().issue(&Claims::new("7", None, -10)).unwrap();
        let mut ctx = RequestContext::builder(Method::Get, "/leads").bearer(&token).build();
        assert_eq!(
            run(&mut ctx).await,
            Err((StatusCode::UNAUTHORIZED, "Token has expired".to_string()))
        );
        assert!(ctx.identity().is_none());
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let other = TokenVerifier::new(Secret::new("other".to_string()));
        let token = other.issue(&Claims::new("7", None, 3600)).unwrap();
        let mut ctx = RequestContext::builder(Method::Get, "/leads").bearer(&token).build();
        assert_eq!(
            run(&mut ctx).await,
            Err((StatusCode::UNAUTHORIZED, "Invalid token signature".to_string()))
        );
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let mut ctx = RequestContext::builder(Method::Get, "/leads").bearer("abc").build();
        assert_eq!(
            run(&mut ctx).await,
            Err((StatusCode::UNAUTHORIZED, "Malformed token".to_string()))
        );
    }

    #[tokio::test]
    async fn test_public_route_bypasses_auth() {
        let mut ctx = RequestContext::builder(Method::Post, "/auth/login")
            .header("Authorization", "garbage")
            .build();
        assert!(run(&mut ctx).await.is_ok());

        // Method must match too
        let mut ctx = RequestContext::builder(Method::Get, "/auth/login").build();
        assert!(run(&mut ctx).await.is_err());
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::Config::default_config("s");
        let auth = AuthMiddleware::from_config(&config.auth).unwrap();
        assert!(auth.is_public(Method::Post, "/auth/refresh"));
        assert!(!auth.is_public(Method::Post, "/leads"));
    }

    #[test]
    fn test_bad_public_route_entry() {
        let mut config = crate::config::Config::default_config("s");
        config.auth.public_routes = vec!["/auth/login".to_string()];
        assert!(AuthMiddleware::from_config(&config.auth).is_err());
    }
}

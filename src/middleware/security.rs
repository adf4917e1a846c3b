//! Security middleware: body size limit, attack-signature rejection,
//! input sanitization and response hardening headers.

use super::{Flow, Middleware, Sanitizer, Stage};
use crate::config::{SecurityConfig, ServerConfig};
use crate::http::{ApiResponse, RequestContext};
use crate::observability::{MetricsCollector, RejectReason};
use async_trait::async_trait;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CONTENT_SECURITY_POLICY, REFERRER_POLICY,
    VARY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest excerpt of an offending value written to the log
const LOGGED_VALUE_CHARS: usize = 100;

/// Category of a detected attack signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    SqlInjection,
    Xss,
    PathTraversal,
}

impl AttackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::SqlInjection => "sql_injection",
            AttackKind::Xss => "xss",
            AttackKind::PathTraversal => "path_traversal",
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static SIGNATURES: Lazy<Vec<(AttackKind, Regex)>> = Lazy::new(|| {
    let patterns: &[(AttackKind, &str)] = &[
        (AttackKind::SqlInjection, r#"(?i)'\s*(or|and)\s+('[^']*'|\d+)\s*=\s*('|\d)"#),
        (AttackKind::SqlInjection, r"(?i)\bunion(\s+all)?\s+select\b"),
        (AttackKind::SqlInjection, r"(?i);\s*(drop|truncate|alter)\s+(table|database)\b"),
        // Comment after a closing quote, only where it ends or chains the statement
        (AttackKind::SqlInjection, r"(?i)'\s*\)*\s*(--|#|/\*)\s*($|[;)]|(and|or|union|select|drop)\b)"),
        (AttackKind::SqlInjection, r"(?i)^\w+'\s*(--|#|/\*)"),
        (AttackKind::SqlInjection, r"(?i)\b(sleep|benchmark)\s*\("),
        (AttackKind::Xss, r"(?i)<\s*script"),
        (AttackKind::Xss, r"(?i)javascript\s*:"),
        // Event handler attribute inside a tag, or breaking out of a quoted attribute
        (
            AttackKind::Xss,
            r#"(?i)<[^>]*[\s"'/]on(error|load|click|mouse\w+|key\w+|focus|blur|change|submit|input|toggle|animation\w+|pointer\w+|drag\w*|wheel|scroll)\s*="#,
        ),
        (AttackKind::Xss, r#"(?i)["']\s*on(error|load|click|mouseover|focus)\s*="#),
        (AttackKind::Xss, r"(?i)<\s*iframe"),
        (AttackKind::PathTraversal, r"\.\./"),
        (AttackKind::PathTraversal, r"\.\.\\"),
        (AttackKind::PathTraversal, r"(?i)%2e%2e"),
    ];

    patterns
        .iter()
        .filter_map(|(kind, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*kind, re)),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Skipping invalid attack signature");
                None
            }
        })
        .collect()
});

/// First attack signature found in `text`
pub fn scan(text: &str) -> Option<AttackKind> {
    SIGNATURES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
}

fn scan_value(value: &Value) -> Option<(AttackKind, String)> {
    match value {
        Value::String(s) => scan(s).map(|kind| (kind, s.clone())),
        Value::Array(items) => items.iter().find_map(scan_value),
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            scan(key)
                .map(|kind| (kind, key.clone()))
                .or_else(|| scan_value(v))
        }),
        _ => None,
    }
}

fn excerpt(value: &str) -> String {
    value.chars().take(LOGGED_VALUE_CHARS).collect()
}

/// Allow-listed origins and the CORS headers granted to them
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    /// CORS headers for `origin`; empty unless it is allow-listed
    pub fn headers_for(&self, origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let allowed = origin
            .filter(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
            .and_then(|o| HeaderValue::from_str(o).ok());

        if let Some(value) = allowed {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
            );
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Authorization, Content-Type"),
            );
        }
        headers
    }

    /// 204 answer to an `OPTIONS` preflight, only for allow-listed origins
    pub fn preflight(&self, origin: Option<&str>) -> Option<ApiResponse> {
        let headers = self.headers_for(origin);
        if headers.is_empty() {
            return None;
        }

        let mut response = ApiResponse::empty(StatusCode::NO_CONTENT)
            .with_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        response.merge_headers(headers);
        Some(response)
    }
}

/// Runs first in the chain
pub struct SecurityMiddleware {
    max_body_bytes: u64,
    sanitizer: Sanitizer,
    cors: CorsPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SecurityMiddleware {
    pub fn new(max_body_bytes: usize, sanitizer: Sanitizer, allowed_origins: Vec<String>) -> Self {
        Self {
            max_body_bytes: max_body_bytes as u64,
            sanitizer,
            cors: CorsPolicy::new(allowed_origins),
            metrics: None,
        }
    }

    pub fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    pub fn from_config(server: &ServerConfig, security: &SecurityConfig) -> Self {
        Self::new(
            server.max_body_bytes,
            Sanitizer::new(security.max_string_length),
            security.allowed_origins.clone(),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Look for attack signatures in the decoded path, the body (keys
    /// included) and the query values.
    pub fn detect(&self, ctx: &RequestContext) -> Option<(AttackKind, String)> {
        let path = urlencoding::decode(ctx.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| ctx.path().to_string());

        // Raw path first: an encoded traversal must not hide behind decoding
        if let Some(kind) = scan(ctx.path()).or_else(|| scan(&path)) {
            return Some((kind, path));
        }

        if let Some(hit) = scan_value(ctx.parsed_body()) {
            return Some(hit);
        }

        ctx.query_params()
            .values()
            .find_map(|v| scan(v).map(|kind| (kind, v.clone())))
    }

    fn reject(&self, reason: RejectReason, response: ApiResponse) -> Flow {
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(reason);
        }
        Flow::ShortCircuit(response)
    }

    fn stage_hardening_headers(&self, ctx: &mut RequestContext) {
        ctx.stage_header(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        ctx.stage_header(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        ctx.stage_header(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        ctx.stage_header(
            REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        ctx.stage_header(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        );

        let origin = ctx.header_line("origin");
        let cors = self.cors.headers_for(origin.as_deref());
        for (name, value) in cors.iter() {
            ctx.stage_header(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Middleware for SecurityMiddleware {
    fn name(&self) -> &'static str {
        "security"
    }

    fn stage(&self) -> Stage {
        Stage::Security
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if ctx.content_length() > self.max_body_bytes {
            warn!(
                request_id = %ctx.request_id(),
                content_length = ctx.content_length(),
                max = self.max_body_bytes,
                "Request body too large"
            );
            return self.reject(
                RejectReason::PayloadTooLarge,
                ApiResponse::error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
            );
        }

        if let Some((kind, value)) = self.detect(ctx) {
            warn!(
                request_id = %ctx.request_id(),
                path = %ctx.path(),
                category = %kind,
                value = %excerpt(&value),
                "Malicious input detected"
            );
            return self.reject(
                RejectReason::MaliciousInput,
                ApiResponse::error(StatusCode::BAD_REQUEST, "Malicious input detected"),
            );
        }

        self.sanitizer.sanitize_value(ctx.parsed_body_mut());
        self.sanitizer.sanitize_map(ctx.query_params_mut());
        self.stage_hardening_headers(ctx);

        debug!(request_id = %ctx.request_id(), "Security checks passed");
        Flow::Continue
    }
}

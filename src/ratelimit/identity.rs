//! Client identification for rate limit keys

use crate::auth::{bearer_token, TokenVerifier};
use crate::http::RequestContext;
use sha2::{Digest, Sha256};
use std::fmt;

/// Body field carrying a tracking visitor id
pub const VISITOR_FIELD: &str = "visitor_id";

const VISITOR_PLACEHOLDERS: &[&str] = &["", "null", "undefined", "anonymous", "0"];

/// Who a request is counted against, strongest signal first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Subject of a valid bearer token
    User(String),
    /// Visitor id supplied in the request body
    Visitor(String),
    /// Hex SHA-256 of client IP and User-Agent
    Anonymous(String),
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::User(id) => write!(f, "user:{}", id),
            ClientIdentity::Visitor(id) => write!(f, "visitor:{}", id),
            ClientIdentity::Anonymous(hash) => write!(f, "anon:{}", hash),
        }
    }
}

/// Derives a [`ClientIdentity`] from a request
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    verifier: TokenVerifier,
    trust_forwarded_for: bool,
}

impl IdentityResolver {
    pub fn new(verifier: TokenVerifier, trust_forwarded_for: bool) -> Self {
        Self {
            verifier,
            trust_forwarded_for,
        }
    }

    pub fn resolve(&self, ctx: &RequestContext) -> ClientIdentity {
        if let Some(identity) = ctx.identity() {
            return ClientIdentity::User(identity.id);
        }

        let user = ctx
            .header_line("authorization")
            .as_deref()
            .and_then(bearer_token)
            .and_then(|token| self.verifier.verify(token).ok())
            .and_then(|claims| claims.subject());
        if let Some(user) = user {
            return ClientIdentity::User(user);
        }

        if let Some(visitor) = visitor_id(ctx) {
            return ClientIdentity::Visitor(visitor);
        }

        let ip = self.client_ip(ctx);
        let user_agent = ctx.header_line("user-agent").unwrap_or_default();
        let digest = Sha256::digest(format!("{}|{}", ip, user_agent).as_bytes());
        ClientIdentity::Anonymous(hex::encode(digest))
    }

    /// Transport address, or the first `X-Forwarded-For` hop when trusted
    pub fn client_ip(&self, ctx: &RequestContext) -> String {
        if self.trust_forwarded_for {
            let forwarded = ctx
                .header_line("x-forwarded-for")
                .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty());
            if let Some(ip) = forwarded {
                return ip;
            }
        }

        ctx.remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn visitor_id(ctx: &RequestContext) -> Option<String> {
    let value = ctx.parsed_body().get(VISITOR_FIELD)?;
    let id = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };

    if VISITOR_PLACEHOLDERS.contains(&id.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::http::Method;
    use secrecy::Secret;
    use serde_json::json;
    use std::net::SocketAddr;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(TokenVerifier::new(Secret::new("s".to_string())), false)
    }

    fn addr() -> SocketAddr {
        "203.0.113.7:5555".parse().unwrap()
    }

    #[test]
    fn test_token_beats_visitor() {
        let token = TokenVerifier::new(Secret::new("s".to_string()))
            .issue(&Claims::new("42", None, 3600))
            .unwrap();
        let ctx = RequestContext::builder(Method::Post, "/track/event")
            .bearer(&token)
            .json(&json!({"visitor_id": "v-1"}))
            .build();

        assert_eq!(resolver().resolve(&ctx), ClientIdentity::User("42".to_string()));
    }

    #[test]
    fn test_invalid_token_falls_through_to_visitor() {
        let ctx = RequestContext::builder(Method::Post, "/track/event")
            .bearer("not.a.token")
            .json(&json!({"visitor_id": "v-1"}))
            .build();

        assert_eq!(resolver().resolve(&ctx), ClientIdentity::Visitor("v-1".to_string()));
    }

    #[test]
    fn test_placeholder_visitor_ignored() {
        for placeholder in ["", "null", "undefined", "Anonymous"] {
            let ctx = RequestContext::builder(Method::Post, "/track/event")
                .json(&json!({ "visitor_id": placeholder }))
                .remote_addr(addr())
                .build();
            assert!(matches!(resolver().resolve(&ctx), ClientIdentity::Anonymous(_)));
        }
    }

    #[test]
    fn test_anonymous_hash_depends_on_ip_and_agent() {
        let a = RequestContext::builder(Method::Get, "/leads")
            .remote_addr(addr())
            .header("User-Agent", "curl/8")
            .build();
        let b = RequestContext::builder(Method::Get, "/leads")
            .remote_addr(addr())
            .header("User-Agent", "firefox")
            .build();

        let resolver = resolver();
        assert_ne!(resolver.resolve(&a), resolver.resolve(&b));
        assert_eq!(resolver.resolve(&a), resolver.resolve(&a.clone()));
        assert!(resolver.resolve(&a).to_string().starts_with("anon:"));
    }

    #[test]
    fn test_authenticated_and_anonymous_same_ip_differ() {
        let token = TokenVerifier::new(Secret::new("s".to_string()))
            .issue(&Claims::new("42", None, 3600))
            .unwrap();
        let authed = RequestContext::builder(Method::Get, "/leads")
            .remote_addr(addr())
            .bearer(&token)
            .build();
        let anon = RequestContext::builder(Method::Get, "/leads")
            .remote_addr(addr())
            .build();

        let resolver = resolver();
        assert_ne!(resolver.resolve(&authed).to_string(), resolver.resolve(&anon).to_string());
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let ctx = RequestContext::builder(Method::Get, "/")
            .remote_addr(addr())
            .header("X-Forwarded-For", "198.51.100.1, 10.0.0.1")
            .build();

        assert_eq!(resolver().client_ip(&ctx), "203.0.113.7");

        let trusting = IdentityResolver::new(TokenVerifier::new(Secret::new("s".to_string())), true);
        assert_eq!(trusting.client_ip(&ctx), "198.51.100.1");
    }
}

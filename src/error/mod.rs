//! Error types for the gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Rate store error: {0}")]
    Store(#[from] StoreError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while registering routes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route pattern must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("Empty parameter name in pattern: {0}")]
    EmptyParameter(String),

    #[error("Duplicate parameter '{name}' in pattern: {pattern}")]
    DuplicateParameter { pattern: String, name: String },

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
}

/// Errors from a rate-limit counter backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Backend returned an unexpected reply: {0}")]
    Protocol(String),

    #[error("Local store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors from bearer token verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not yet valid")]
    NotYetValid,

    #[error("Token is missing required claims")]
    MissingClaims,

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

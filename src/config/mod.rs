//! Configuration management for the gateway

use indexmap::IndexMap;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Maximum accepted `Content-Length` in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Bearer token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 signing secret (secured)
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub jwt_secret: Secret<String>,

    /// Lifetime of tokens issued by the login endpoint
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    /// `METHOD:path-prefix` pairs that never require a token
    #[serde(default = "default_public_routes")]
    pub public_routes: Vec<String>,
}

/// Input sanitization and response hardening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Strings longer than this are truncated after escaping
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,

    /// Origins that receive CORS headers
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_string_length: default_max_string_length(),
            allowed_origins: Vec::new(),
        }
    }
}

/// A named `max_requests` per `window_secs` tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    pub max_requests: u64,
    pub window_secs: u64,
}

/// Maps a path prefix onto a policy name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRule {
    pub prefix: String,
    pub policy: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether to enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shared counter store; the local fallback is used when absent or unreachable
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Connect and per-operation timeout for the shared store
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Directory for the local fallback's per-key files (in-memory only when unset)
    #[serde(default)]
    pub local_store_dir: Option<String>,

    /// How often expired keys are swept from in-process stores
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Take the client IP from the first `X-Forwarded-For` entry
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Named policy tiers
    #[serde(default = "default_policies")]
    pub policies: IndexMap<String, PolicyConfig>,

    /// Ordered prefix rules, first match wins
    #[serde(default = "default_rules")]
    pub rules: Vec<PolicyRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            store_timeout_ms: default_store_timeout_ms(),
            local_store_dir: None,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            trust_forwarded_for: false,
            policies: default_policies(),
            rules: default_rules(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_max_body_bytes() -> usize { 1024 * 1024 } // 1 MB
fn default_token_ttl() -> i64 { 3600 }
fn default_max_string_length() -> usize { 10_000 }
fn default_store_timeout_ms() -> u64 { 50 }
fn default_cleanup_interval_secs() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_true() -> bool { true }

fn default_public_routes() -> Vec<String> {
    vec!["POST:/auth/login".to_string(), "POST:/auth/refresh".to_string()]
}

pub(crate) fn default_policies() -> IndexMap<String, PolicyConfig> {
    let mut policies = IndexMap::new();
    policies.insert("default".to_string(), PolicyConfig { max_requests: 60, window_secs: 60 });
    policies.insert("public".to_string(), PolicyConfig { max_requests: 100, window_secs: 60 });
    policies.insert("chat".to_string(), PolicyConfig { max_requests: 20, window_secs: 60 });
    policies.insert("auth".to_string(), PolicyConfig { max_requests: 5, window_secs: 300 });
    policies
}

pub(crate) fn default_rules() -> Vec<PolicyRule> {
    [
        ("/auth/login", "auth"),
        ("/ai/chat", "chat"),
        ("/public/", "public"),
        ("/track/", "public"),
    ]
    .into_iter()
    .map(|(prefix, policy)| PolicyRule {
        prefix: prefix.to_string(),
        policy: policy.to_string(),
    })
    .collect()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration with the given signing secret
    pub fn default_config(jwt_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig {
                jwt_secret: Secret::new(jwt_secret.into()),
                token_ttl_secs: default_token_ttl(),
                public_routes: default_public_routes(),
            },
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Custom serializer for Secret<String>
fn serialize_secret<S>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// Custom deserializer for Secret<String>
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Secret<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}

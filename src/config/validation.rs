//! Configuration validation

use super::*;
use crate::error::{GatewayError, Result};

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_auth_config(&config.auth)?;
    validate_security_config(&config.security)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(GatewayError::Config("Server host cannot be empty".to_string()));
    }

    if config.max_body_bytes == 0 {
        return Err(GatewayError::Config(
            "Maximum body size must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth_config(config: &AuthConfig) -> Result<()> {
    if config.jwt_secret.expose_secret().is_empty() {
        return Err(GatewayError::Config("JWT secret is required".to_string()));
    }

    if config.token_ttl_secs <= 0 {
        return Err(GatewayError::Config(
            "Token TTL must be greater than 0".to_string(),
        ));
    }

    for entry in &config.public_routes {
        let Some((method, path)) = entry.split_once(':') else {
            return Err(GatewayError::Config(format!(
                "Public route '{}' must have the form METHOD:/path",
                entry
            )));
        };

        if !SUPPORTED_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
            return Err(GatewayError::Config(format!(
                "Public route '{}' uses an unsupported method",
                entry
            )));
        }

        if !path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "Public route '{}' path must start with '/'",
                entry
            )));
        }
    }

    Ok(())
}

fn validate_security_config(config: &SecurityConfig) -> Result<()> {
    if config.max_string_length == 0 {
        return Err(GatewayError::Config(
            "Maximum string length must be greater than 0".to_string(),
        ));
    }

    for origin in &config.allowed_origins {
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(GatewayError::Config(format!(
                "Allowed origin '{}' must start with http:// or https://",
                origin
            )));
        }
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
    if !config.policies.contains_key("default") {
        return Err(GatewayError::Config(
            "Rate limit policies must include 'default'".to_string(),
        ));
    }

    for (name, policy) in &config.policies {
        if policy.max_requests == 0 {
            return Err(GatewayError::Config(format!(
                "Policy '{}' max_requests must be greater than 0",
                name
            )));
        }

        if policy.window_secs == 0 {
            return Err(GatewayError::Config(format!(
                "Policy '{}' window_secs must be greater than 0",
                name
            )));
        }
    }

    for rule in &config.rules {
        if !rule.prefix.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "Rule prefix '{}' must start with '/'",
                rule.prefix
            )));
        }

        if !config.policies.contains_key(&rule.policy) {
            return Err(GatewayError::Config(format!(
                "Rule for '{}' references unknown policy '{}'",
                rule.prefix, rule.policy
            )));
        }
    }

    if config.store_timeout_ms == 0 {
        return Err(GatewayError::Config(
            "Store timeout must be greater than 0".to_string(),
        ));
    }

    if config.store_timeout_ms > 1000 {
        return Err(GatewayError::Config(
            "Store timeout too large (max: 1000 ms)".to_string(),
        ));
    }

    if config.cleanup_interval_secs == 0 {
        return Err(GatewayError::Config(
            "Cleanup interval must be greater than 0".to_string(),
        ));
    }

    if let Some(url) = &config.redis_url {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GatewayError::Config(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    match config.format.as_str() {
        "json" | "compact" | "pretty" => Ok(()),
        other => Err(GatewayError::Config(format!(
            "Unknown log format '{}' (expected json, compact or pretty)",
            other
        ))),
    }
}

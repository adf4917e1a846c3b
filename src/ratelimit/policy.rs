//! Rate limit tiers and the path rules that select them

use crate::config::{PolicyConfig, PolicyRule};
use indexmap::IndexMap;
use std::time::Duration;

/// Name of the policy used when no rule matches
pub const DEFAULT_POLICY: &str = "default";

/// `max_requests` per `window_secs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: String,
    pub max_requests: u64,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>, max_requests: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Build policies from configuration, keeping declaration order
pub fn policies_from_config(config: &IndexMap<String, PolicyConfig>) -> Vec<RateLimitPolicy> {
    config
        .iter()
        .map(|(name, p)| RateLimitPolicy::new(name.clone(), p.max_requests, p.window_secs))
        .collect()
}

/// Maps request paths to policy names. Rules are checked in order and the
/// first prefix that matches wins.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    rules: Vec<PolicyRule>,
}

impl PolicyResolver {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, path: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .map(|rule| rule.policy.as_str())
            .unwrap_or(DEFAULT_POLICY)
    }
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::new(crate::config::default_rules())
    }
}

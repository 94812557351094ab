//! Configuration types for the Request Guard agent.

use crate::error::ConfigError;
use crate::event::Severity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted window or block duration: one year.
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 3600;

fn window_in_range(seconds: u64) -> bool {
    (1..=MAX_WINDOW_SECONDS).contains(&seconds)
}

/// Main configuration for the Request Guard agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Per-class rate limits and whitelist
    pub rate_limits: RateLimitConfig,

    /// Escalation from rate-limit violations to IP blocks
    pub auto_block: AutoBlockConfig,

    /// Attack pattern detection settings
    pub detection: DetectionConfig,

    /// How authenticated callers are recognised
    pub auth: AuthConfig,

    /// Alert queue settings
    pub alerts: AlertConfig,

    /// Backing store settings
    pub store: StoreConfig,
}

impl GuardConfig {
    /// Check the configuration for values that would disable or break the guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.rate_limits;
        for (name, rule) in [
            ("login", &limits.login),
            ("password_reset", &limits.password_reset),
            ("api", &limits.api),
            ("audit_access", &limits.audit_access),
            ("general", &limits.general),
        ] {
            if rule.limit == 0 {
                return Err(ConfigError::InvalidLimit(name.to_string()));
            }
            if !window_in_range(rule.window_seconds) {
                return Err(ConfigError::InvalidWindow(name.to_string()));
            }
        }

        if limits.authenticated_multiplier == 0 {
            return Err(ConfigError::InvalidMultiplier);
        }

        if self.auto_block.threshold == 0 {
            return Err(ConfigError::InvalidThreshold);
        }
        if !window_in_range(self.auto_block.window_seconds) {
            return Err(ConfigError::InvalidWindow("auto_block".to_string()));
        }
        if !window_in_range(self.auto_block.duration_seconds) {
            return Err(ConfigError::InvalidBlockDuration);
        }

        if self.alerts.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        Ok(())
    }
}

/// Limit and window for one limit class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests allowed per window
    pub limit: u32,

    /// Window length in seconds
    pub window_seconds: u64,
}

impl LimitRule {
    pub const fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Rate limit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// `/users/sign_in*`
    pub login: LimitRule,

    /// `/users/password*`
    pub password_reset: LimitRule,

    /// `/api/*`
    pub api: LimitRule,

    /// `/audits*`
    pub audit_access: LimitRule,

    /// Everything else
    pub general: LimitRule,

    /// Path prefixes that are never rate limited
    pub whitelist: Vec<String>,

    /// Authenticated callers may go up to `limit * authenticated_multiplier`
    pub authenticated_multiplier: u32,

    /// Value of the `Retry-After` header on 429 responses
    pub retry_after_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: LimitRule::new(5, 300),
            password_reset: LimitRule::new(3, 3600),
            api: LimitRule::new(100, 3600),
            audit_access: LimitRule::new(50, 300),
            general: LimitRule::new(200, 3600),
            whitelist: vec![
                "/health".to_string(),
                "/up".to_string(),
                "/assets/".to_string(),
                "/favicon.ico".to_string(),
            ],
            authenticated_multiplier: 2,
            retry_after_seconds: 300,
        }
    }
}

/// Auto-block policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBlockConfig {
    /// Escalate violations to blocks at all
    pub enabled: bool,

    /// Violations within the window that trigger a block
    pub threshold: u32,

    /// Violation counting window in seconds
    pub window_seconds: u64,

    /// How long an automatic block lasts in seconds
    pub duration_seconds: u64,
}

impl AutoBlockConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

impl Default for AutoBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            window_seconds: 3600,
            duration_seconds: 7200,
        }
    }
}

/// Detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Look for `../` style traversal in path and query
    pub path_traversal: bool,

    /// Look for SQL injection signatures in the query string
    pub sql_injection: bool,

    /// Look for script injection signatures in the query string
    pub xss: bool,

    /// Look for scanner and scripted-client user agents
    pub suspicious_user_agent: bool,

    /// Additional user-agent tokens treated as suspicious
    pub extra_user_agent_tokens: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            path_traversal: true,
            sql_injection: true,
            xss: true,
            suspicious_user_agent: true,
            extra_user_agent_tokens: vec![],
        }
    }
}

/// Authentication probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Cookie whose presence marks a session
    pub session_cookie: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: "_session_id".to_string(),
        }
    }
}

/// Alert queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Maximum queued alerts before new ones are dropped
    pub queue_capacity: usize,

    /// Severity attached to requests from blocked IPs
    pub blocked_ip_severity: Severity,

    /// Severity attached to rate-limit rejections
    pub rate_limit_severity: Severity,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            blocked_ip_severity: Severity::Medium,
            rate_limit_severity: Severity::Medium,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum blocked IPs kept in memory
    pub max_blocked_ips: u64,

    /// Upper bound on a single store call in milliseconds
    pub timeout_ms: u64,

    /// Sweep expired counters every N store operations
    pub sweep_interval_ops: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_blocked_ips: 100_000,
            timeout_ms: 50,
            sweep_interval_ops: 1000,
        }
    }
}

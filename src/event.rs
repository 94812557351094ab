//! Security event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of security-relevant thing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Request from an IP on the block list
    BlockedIpAttempt,
    /// Request rejected by the rate limiter
    RateLimitExceeded,
    /// `../` style traversal in path or query
    PathTraversalAttempt,
    /// SQL injection signature in the query string
    SqlInjectionAttempt,
    /// Script injection signature in the query string
    XssAttempt,
    /// Scanner or scripted-client user agent
    SuspiciousUserAgent,
}

impl EventKind {
    /// Returns the kind as a string for logs and alerts.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BlockedIpAttempt => "blocked_ip_attempt",
            EventKind::RateLimitExceeded => "rate_limit_exceeded",
            EventKind::PathTraversalAttempt => "path_traversal_attempt",
            EventKind::SqlInjectionAttempt => "sql_injection_attempt",
            EventKind::XssAttempt => "xss_attempt",
            EventKind::SuspiciousUserAgent => "suspicious_user_agent",
        }
    }

    /// Returns true for kinds produced by the pattern detector.
    pub fn is_pattern_match(&self) -> bool {
        matches!(
            self,
            EventKind::PathTraversalAttempt
                | EventKind::SqlInjectionAttempt
                | EventKind::XssAttempt
                | EventKind::SuspiciousUserAgent
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one security-relevant observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: EventKind,
    pub severity: Severity,
    /// Resolved client address
    pub ip: String,
    pub path: String,
    /// Raw query string, empty when absent
    pub query: String,
    pub user_agent: Option<String>,
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    /// Human-readable one-line summary used as the alert message.
    pub fn message(&self) -> String {
        match self.kind {
            EventKind::BlockedIpAttempt => format!("Blocked IP {} attempted {}", self.ip, self.path),
            EventKind::RateLimitExceeded => {
                format!("Rate limit exceeded by {} on {}", self.ip, self.path)
            }
            EventKind::PathTraversalAttempt => {
                format!("Path traversal attempt from {} on {}", self.ip, self.path)
            }
            EventKind::SqlInjectionAttempt => {
                format!("SQL injection attempt from {} on {}", self.ip, self.path)
            }
            EventKind::XssAttempt => format!("XSS attempt from {} on {}", self.ip, self.path),
            EventKind::SuspiciousUserAgent => format!(
                "Suspicious user agent from {}: {}",
                self.ip,
                self.user_agent.as_deref().unwrap_or("")
            ),
        }
    }
}

//! Per-endpoint-class rate limiting.
//!
//! One counter per (class, ip); its window opens with the first request. Store failures fail open.

use crate::config::{LimitRule, RateLimitConfig};
use crate::request::Request;
use crate::store::{bounded, counter_key, CounterStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Bucket of rate-limit rules for a group of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitClass {
    Login,
    PasswordReset,
    Api,
    AuditAccess,
    General,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Login => "login",
            LimitClass::PasswordReset => "password_reset",
            LimitClass::Api => "api",
            LimitClass::AuditAccess => "audit_access",
            LimitClass::General => "general",
        }
    }

    /// First-match classification of a request path. Order matters.
    pub fn classify(path: &str) -> LimitClass {
        if path.starts_with("/users/sign_in") {
            LimitClass::Login
        } else if path.starts_with("/users/password") {
            LimitClass::PasswordReset
        } else if path.starts_with("/api/") {
            LimitClass::Api
        } else if path.starts_with("/audits") {
            LimitClass::AuditAccess
        } else {
            LimitClass::General
        }
    }

    pub fn rule(&self, config: &RateLimitConfig) -> LimitRule {
        match self {
            LimitClass::Login => config.login,
            LimitClass::PasswordReset => config.password_reset,
            LimitClass::Api => config.api,
            LimitClass::AuditAccess => config.audit_access,
            LimitClass::General => config.general,
        }
    }
}

/// Whether `path` falls under one of the whitelist prefixes.
///
/// Prefixes ending in `/` match anything below them; other prefixes match the
/// exact path or a sub-path, so `/up` does not cover `/uploads`.
pub fn is_whitelisted(path: &str, whitelist: &[String]) -> bool {
    whitelist.iter().any(|prefix| {
        if prefix.ends_with('/') {
            return path.starts_with(prefix.as_str());
        }
        match path.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    })
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitOutcome {
    /// Path is whitelisted
    Exempt,
    /// Request counted and allowed
    Allowed { class: LimitClass, count: u64 },
    /// Request rejected
    Limited { class: LimitClass, limit: u64, window: Duration },
    /// Store failed; request allowed without counting
    FailedOpen { class: LimitClass },
}

impl LimitOutcome {
    pub fn is_limited(&self) -> bool {
        matches!(self, LimitOutcome::Limited { .. })
    }
}

/// Rate limiter over a shared counter store.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    session_cookie: String,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        session_cookie: impl Into<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            session_cookie: session_cookie.into(),
            store_timeout,
        }
    }

    /// True when the request from `ip` must be rejected.
    pub async fn should_limit(&self, ip: &str, request: &Request) -> bool {
        self.check(ip, request).await.is_limited()
    }

    /// Classify, count and decide. Never fails: store errors are logged and allowed through.
    pub async fn check(&self, ip: &str, request: &Request) -> LimitOutcome {
        if is_whitelisted(&request.path, &self.config.whitelist) {
            return LimitOutcome::Exempt;
        }

        let class = LimitClass::classify(&request.path);
        let rule = class.rule(&self.config);
        let authenticated = request.is_authenticated(&self.session_cookie);
        let key = counter_key(&format!("rate:{}", class.as_str()), ip);

        let current = match bounded(self.store_timeout, self.store.get(&key)).await {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                error!(error = %e, client_ip = %ip, class = class.as_str(), "Rate limit lookup failed, allowing request");
                return LimitOutcome::FailedOpen { class };
            }
        };

        let limit = u64::from(rule.limit);
        let ceiling = if authenticated {
            limit.saturating_mul(u64::from(self.config.authenticated_multiplier))
        } else {
            limit
        };

        if current >= ceiling {
            debug!(
                client_ip = %ip,
                class = class.as_str(),
                count = current,
                limit = ceiling,
                authenticated,
                "Rate limit reached"
            );
            return LimitOutcome::Limited {
                class,
                limit: ceiling,
                window: rule.window(),
            };
        }

        match bounded(self.store_timeout, self.store.increment(&key, rule.window())).await {
            Ok(count) => {
                debug!(client_ip = %ip, class = class.as_str(), count, "Request counted");
                LimitOutcome::Allowed { class, count }
            }
            Err(e) => {
                error!(error = %e, client_ip = %ip, class = class.as_str(), "Rate limit update failed, allowing request");
                LimitOutcome::FailedOpen { class }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(MemoryCounterStore::default()),
            "_session_id",
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(LimitClass::classify("/users/sign_in"), LimitClass::Login);
        assert_eq!(LimitClass::classify("/users/sign_in.json"), LimitClass::Login);
        assert_eq!(LimitClass::classify("/users/password/new"), LimitClass::PasswordReset);
        assert_eq!(LimitClass::classify("/api/v1/quotes"), LimitClass::Api);
        assert_eq!(LimitClass::classify("/api"), LimitClass::General);
        assert_eq!(LimitClass::classify("/audits/42"), LimitClass::AuditAccess);
        assert_eq!(LimitClass::classify("/clients"), LimitClass::General);
    }

    #[test]
    fn test_whitelist() {
        let whitelist = RateLimitConfig::default().whitelist;
        assert!(is_whitelisted("/health", &whitelist));
        assert!(is_whitelisted("/health/db", &whitelist));
        assert!(is_whitelisted("/up", &whitelist));
        assert!(is_whitelisted("/assets/app-3f2a.js", &whitelist));
        assert!(is_whitelisted("/favicon.ico", &whitelist));
        assert!(!is_whitelisted("/uploads/form.pdf", &whitelist));
        assert!(!is_whitelisted("/assets", &whitelist));
        assert!(!is_whitelisted("/users/sign_in", &whitelist));
    }

    #[tokio::test]
    async fn test_login_limit_unauthenticated() {
        let limiter = limiter();
        let req = Request::new("POST", "/users/sign_in", "1.1.1.1");

        for i in 1..=5 {
            assert!(!limiter.should_limit("1.1.1.1", &req).await, "request {} allowed", i);
        }
        assert!(limiter.should_limit("1.1.1.1", &req).await);
        // Other IPs keep their own counters.
        assert!(!limiter.should_limit("2.2.2.2", &req).await);
    }

    #[tokio::test]
    async fn test_authenticated_gets_double() {
        let limiter = limiter();
        let req = Request::new("POST", "/users/sign_in", "1.1.1.1")
            .with_header("cookie", "_session_id=abc");

        for i in 1..=10 {
            assert!(!limiter.should_limit("1.1.1.1", &req).await, "request {} allowed", i);
        }
        match limiter.check("1.1.1.1", &req).await {
            LimitOutcome::Limited { class, limit, .. } => {
                assert_eq!(class, LimitClass::Login);
                assert_eq!(limit, 10);
            }
            other => panic!("expected limited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classes_counted_separately() {
        let limiter = limiter();
        let login = Request::new("POST", "/users/sign_in", "1.1.1.1");
        let reset = Request::new("POST", "/users/password", "1.1.1.1");

        for _ in 0..5 {
            limiter.check("1.1.1.1", &login).await;
        }
        assert!(limiter.should_limit("1.1.1.1", &login).await);

        for _ in 0..3 {
            assert!(!limiter.should_limit("1.1.1.1", &reset).await);
        }
        assert!(limiter.should_limit("1.1.1.1", &reset).await);
    }

    #[tokio::test]
    async fn test_whitelisted_never_limited() {
        let limiter = limiter();
        let req = Request::new("GET", "/health", "1.1.1.1");
        for _ in 0..500 {
            assert_eq!(limiter.check("1.1.1.1", &req).await, LimitOutcome::Exempt);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_counts_from_first_request() {
        let config = RateLimitConfig {
            login: LimitRule::new(5, 10),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(
            config,
            Arc::new(MemoryCounterStore::default()),
            "_session_id",
            Duration::from_millis(50),
        );
        let req = Request::new("POST", "/users/sign_in", "1.1.1.1");

        assert!(!limiter.should_limit("1.1.1.1", &req).await);
        tokio::time::advance(Duration::from_secs(9)).await;
        for _ in 0..4 {
            assert!(!limiter.should_limit("1.1.1.1", &req).await);
        }
        assert!(limiter.should_limit("1.1.1.1", &req).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!limiter.should_limit("1.1.1.1", &req).await);
    }
}

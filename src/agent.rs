//! Main request guard agent implementation.
//!
//! Per request: resolve IP, reject blocked IPs (403), reject rate-limited
//! requests (429, counted toward auto-blocking), then run pattern detection
//! and let the request through.

use crate::alerts::{AlertReceiver, AlertSink};
use crate::auto_block::{AutoBlockPolicy, ViolationOutcome};
use crate::block_list::{BlockEntry, BlockList, MemoryBlockList};
use crate::config::GuardConfig;
use crate::detectors::PatternDetector;
use crate::error::StoreError;
use crate::event::{EventKind, SecurityEvent, Severity};
use crate::ip::resolve_client_ip;
use crate::limiter::{LimitOutcome, RateLimiter};
use crate::request::Request;
use crate::response::{request_id, Response};
use crate::store::{bounded, CounterStore, MemoryCounterStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Downstream application the guard protects.
#[async_trait]
pub trait Application: Send + Sync {
    async fn call(&self, request: &Request) -> Response;
}

/// Outcome of the guard for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    /// Forward to the application; `events` were observed but do not block
    Allow { events: Vec<SecurityEvent> },
    /// Answer with `response` instead of the application
    Deny {
        response: Response,
        event: SecurityEvent,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    /// All events produced for the request.
    pub fn events(&self) -> Vec<&SecurityEvent> {
        match self {
            Verdict::Allow { events } => events.iter().collect(),
            Verdict::Deny { event, .. } => vec![event],
        }
    }
}

#[derive(Debug, Default)]
struct GuardStats {
    requests: AtomicU64,
    blocked: AtomicU64,
    rate_limited: AtomicU64,
    events: AtomicU64,
    store_errors: AtomicU64,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub blocked: u64,
    pub rate_limited: u64,
    pub events: u64,
    pub store_errors: u64,
    pub alerts_dropped: u64,
}

/// Request Guard Agent.
pub struct RequestGuardAgent {
    /// Configuration
    config: GuardConfig,
    /// Blocked IPs
    block_list: Arc<dyn BlockList>,
    /// Per-class rate limiter
    limiter: RateLimiter,
    /// Violation escalation
    auto_block: AutoBlockPolicy,
    /// Attack pattern rules
    detector: PatternDetector,
    /// Alert queue
    alerts: AlertSink,
    stats: GuardStats,
}

impl RequestGuardAgent {
    /// Create an agent over the given stores.
    pub fn new(
        config: GuardConfig,
        counters: Arc<dyn CounterStore>,
        block_list: Arc<dyn BlockList>,
        alerts: AlertSink,
    ) -> Self {
        let timeout = config.store.timeout();

        let limiter = RateLimiter::new(
            config.rate_limits.clone(),
            Arc::clone(&counters),
            config.auth.session_cookie.clone(),
            timeout,
        );

        let auto_block = AutoBlockPolicy::new(
            config.auto_block.clone(),
            counters,
            Arc::clone(&block_list),
            timeout,
        );

        let detector = PatternDetector::from_config(&config.detection);

        Self {
            config,
            block_list,
            limiter,
            auto_block,
            detector,
            alerts,
            stats: GuardStats::default(),
        }
    }

    /// Create an agent with in-memory stores and a fresh alert queue.
    pub fn in_memory(config: GuardConfig) -> (Self, AlertReceiver) {
        let (alerts, receiver) = AlertSink::channel(config.alerts.queue_capacity);
        let counters = Arc::new(MemoryCounterStore::new(config.store.sweep_interval_ops));
        let block_list = Arc::new(MemoryBlockList::new(config.store.max_blocked_ips));
        (Self::new(config, counters, block_list, alerts), receiver)
    }

    pub fn name(&self) -> &str {
        "request-guard"
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn auto_block(&self) -> &AutoBlockPolicy {
        &self.auto_block
    }

    fn event(&self, kind: EventKind, severity: Severity, ip: &str, request: &Request) -> SecurityEvent {
        SecurityEvent {
            kind,
            severity,
            ip: ip.to_string(),
            path: request.path.clone(),
            query: request.query_str().to_string(),
            user_agent: request.user_agent().map(str::to_string),
            tenant_id: request.tenant_id.clone(),
            timestamp: Utc::now(),
        }
    }

    fn emit(&self, event: &SecurityEvent) {
        self.stats.events.fetch_add(1, Ordering::Relaxed);
        self.alerts.emit(event);
    }

    async fn is_blocked(&self, ip: &str) -> bool {
        match bounded(self.config.store.timeout(), self.block_list.is_blocked(ip)).await {
            Ok(blocked) => blocked,
            Err(e) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, client_ip = %ip, "Block list lookup failed, allowing request");
                false
            }
        }
    }

    /// Decide what happens to `request`. Never fails.
    pub async fn on_request(&self, request: &Request) -> Verdict {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let ip = resolve_client_ip(request);

        if self.is_blocked(&ip).await {
            let event = self.event(
                EventKind::BlockedIpAttempt,
                self.config.alerts.blocked_ip_severity,
                &ip,
                request,
            );
            self.emit(&event);
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);

            info!(client_ip = %ip, path = %request.path, "Rejected request from blocked IP");
            return Verdict::Deny {
                response: Response::forbidden(&request_id(request)),
                event,
            };
        }

        match self.limiter.check(&ip, request).await {
            LimitOutcome::Limited { class, limit, .. } => {
                let event = self.event(
                    EventKind::RateLimitExceeded,
                    self.config.alerts.rate_limit_severity,
                    &ip,
                    request,
                );
                self.emit(&event);
                self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                if self.auto_block.record_violation(&ip).await == ViolationOutcome::Failed {
                    self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                }

                info!(
                    client_ip = %ip,
                    path = %request.path,
                    class = class.as_str(),
                    limit,
                    "Rate limit exceeded"
                );
                return Verdict::Deny {
                    response: Response::too_many_requests(
                        &request_id(request),
                        limit,
                        self.config.rate_limits.retry_after_seconds,
                    ),
                    event,
                };
            }
            LimitOutcome::FailedOpen { .. } => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
            }
            LimitOutcome::Exempt | LimitOutcome::Allowed { .. } => {}
        }

        let events = self.detector.inspect(&ip, request);
        for event in &events {
            warn!(
                client_ip = %ip,
                path = %request.path,
                kind = %event.kind,
                severity = %event.severity,
                "Attack pattern detected"
            );
            self.emit(event);
        }

        debug!(client_ip = %ip, path = %request.path, events = events.len(), "Request allowed");
        Verdict::Allow { events }
    }

    /// Run the guard and, if allowed, the application. The application's response is returned as-is.
    pub async fn handle<A>(&self, request: &Request, app: &A) -> Response
    where
        A: Application + ?Sized,
    {
        match self.on_request(request).await {
            Verdict::Deny { response, .. } => response,
            Verdict::Allow { .. } => app.call(request).await,
        }
    }

    /// Block `ip` administratively. `None` duration never expires.
    pub async fn block(
        &self,
        ip: &str,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<BlockEntry, StoreError> {
        bounded(self.config.store.timeout(), self.block_list.block(ip, reason, duration)).await
    }

    pub async fn unblock(&self, ip: &str) -> Result<Option<BlockEntry>, StoreError> {
        bounded(self.config.store.timeout(), self.block_list.unblock(ip)).await
    }

    pub async fn list_blocks(&self) -> Result<Vec<BlockEntry>, StoreError> {
        bounded(self.config.store.timeout(), self.block_list.entries()).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            blocked: self.stats.blocked.load(Ordering::Relaxed),
            rate_limited: self.stats.rate_limited.load(Ordering::Relaxed),
            events: self.stats.events.load(Ordering::Relaxed),
            store_errors: self.stats.store_errors.load(Ordering::Relaxed),
            alerts_dropped: self.alerts.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Application for Echo {
        async fn call(&self, request: &Request) -> Response {
            Response::new(200).with_body(request.path.clone())
        }
    }

    #[tokio::test]
    async fn test_agent_creation() {
        let (agent, _rx) = RequestGuardAgent::in_memory(GuardConfig::default());
        assert_eq!(agent.name(), "request-guard");
        assert_eq!(agent.stats(), StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_clean_request_reaches_app() {
        let (agent, mut rx) = RequestGuardAgent::in_memory(GuardConfig::default());
        let req = Request::new("GET", "/clients", "10.0.0.1")
            .with_header("user-agent", "Mozilla/5.0 Firefox/128.0");

        let resp = agent.handle(&req, &Echo).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "/clients");
        assert!(rx.try_recv().is_none());
        assert_eq!(agent.stats().requests, 1);
    }

    #[tokio::test]
    async fn test_blocked_ip_gets_403() {
        let (agent, mut rx) = RequestGuardAgent::in_memory(GuardConfig::default());
        agent.block("10.0.0.7", "manual", None).await.unwrap();

        let req = Request::new("GET", "/clients", "10.0.0.7");
        let verdict = agent.on_request(&req).await;
        match verdict {
            Verdict::Deny { response, event } => {
                assert_eq!(response.status, 403);
                assert!(response.header("x-request-id").is_some());
                assert_eq!(event.kind, EventKind::BlockedIpAttempt);
                assert_eq!(event.severity, Severity::Medium);
            }
            other => panic!("expected deny, got {:?}", other),
        }

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, EventKind::BlockedIpAttempt);
        assert_eq!(agent.stats().blocked, 1);
    }

    #[tokio::test]
    async fn test_pattern_events_do_not_block() {
        let (agent, _rx) = RequestGuardAgent::in_memory(GuardConfig::default());
        let req = Request::new("GET", "/quotes?id=1 UNION SELECT password FROM users", "10.0.0.1");

        let verdict = agent.on_request(&req).await;
        assert!(verdict.is_allowed());
        let events = verdict.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SqlInjectionAttempt);
        assert_eq!(events[0].severity, Severity::Critical);
    }
}

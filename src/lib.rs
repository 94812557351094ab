//! Request Guard Agent for Zentinel
//!
//! Screens every inbound request before it reaches the application and
//! returns ALLOW/DENY decisions.
//!
//! # Features
//!
//! - Client IP resolution behind proxies (`X-Forwarded-For`, `X-Real-IP`)
//! - IP block list with optional expiry
//! - Per-endpoint-class windowed rate limiting, failing open on store errors
//! - Automatic blocking of IPs that keep hitting rate limits
//! - Non-blocking detection of path traversal, SQL injection, XSS and scanner user agents
//! - Bounded, drop-on-overflow alert queue
//!
//! # Example
//!
//! ```ignore
//! use zentinel_agent_request_guard::{GuardConfig, Request, RequestGuardAgent};
//!
//! let (agent, alerts) = RequestGuardAgent::in_memory(GuardConfig::default());
//! alerts.spawn_logger();
//!
//! let request = Request::new("POST", "/users/sign_in", "203.0.113.7");
//! let verdict = agent.on_request(&request).await;
//! ```

pub mod agent;
pub mod alerts;
pub mod auto_block;
pub mod block_list;
pub mod config;
pub mod detectors;
pub mod error;
pub mod event;
pub mod ip;
pub mod limiter;
pub mod protocol;
pub mod request;
pub mod response;
pub mod store;

pub use agent::{Application, RequestGuardAgent, StatsSnapshot, Verdict};
pub use config::GuardConfig;
pub use event::{EventKind, SecurityEvent, Severity};
pub use request::Request;
pub use response::Response;

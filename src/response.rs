//! Synthesized HTTP responses for denied requests.

use crate::request::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 403 for a blocked client.
    pub fn forbidden(request_id: &str) -> Self {
        let body = serde_json::json!({
            "error": "Access denied",
            "request_id": request_id,
        });

        Response::new(403)
            .with_header("Content-Type", "application/json")
            .with_header(REQUEST_ID_HEADER, request_id)
            .with_body(body.to_string())
    }

    /// 429 for a rate-limited client.
    pub fn too_many_requests(request_id: &str, limit: u64, retry_after_seconds: u64) -> Self {
        let body = serde_json::json!({
            "error": "Rate limit exceeded. Please try again later.",
        });

        Response::new(429)
            .with_header("Content-Type", "application/json")
            .with_header("Retry-After", retry_after_seconds.to_string())
            .with_header("X-RateLimit-Limit", limit.to_string())
            .with_header("X-RateLimit-Remaining", "0")
            .with_header(REQUEST_ID_HEADER, request_id)
            .with_body(body.to_string())
    }
}

/// Reuse a well-formed incoming request id, otherwise generate one.
pub fn request_id(request: &Request) -> String {
    request
        .header(REQUEST_ID_HEADER)
        .map(str::trim)
        .filter(|id| is_valid_request_id(id))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

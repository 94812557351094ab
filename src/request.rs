//! Inbound request view used by every stage of the guard.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// The parts of an HTTP request the guard inspects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// HTTP method
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Request headers (lowercase keys)
    #[serde(deserialize_with = "lowercase_headers")]
    pub headers: HashMap<String, Vec<String>>,
    /// Transport-level peer address
    pub remote_addr: String,
    /// Tenant the request was routed to, when known
    pub tenant_id: Option<String>,
}

/// Fold header names to lowercase, merging values of names that differ only in case.
fn lowercase_headers<'de, D>(deserializer: D) -> Result<HashMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, Vec<String>>::deserialize(deserializer)?;
    let mut headers: HashMap<String, Vec<String>> = HashMap::with_capacity(raw.len());
    for (name, values) in raw {
        headers.entry(name.to_lowercase()).or_default().extend(values);
    }
    Ok(headers)
}

impl Request {
    /// Create a request for `method` and `uri`; a `?` in the uri splits off the query.
    pub fn new(method: impl Into<String>, uri: &str, remote_addr: impl Into<String>) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };

        Self {
            method: method.into(),
            path,
            query,
            headers: HashMap::new(),
            remote_addr: remote_addr.into(),
            tenant_id: None,
        }
    }

    /// Append a header value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Get a single header value (first if multiple).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Get the User-Agent header.
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Query string, empty when absent.
    pub fn query_str(&self) -> &str {
        self.query.as_deref().unwrap_or("")
    }

    /// Path and query joined the way they appeared on the request line.
    pub fn full_path(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// True when the request carries a session cookie or an Authorization header.
    pub fn is_authenticated(&self, session_cookie: &str) -> bool {
        if self
            .header("authorization")
            .is_some_and(|v| !v.trim().is_empty())
        {
            return true;
        }

        let Some(cookies) = self.headers.get("cookie") else {
            return false;
        };

        cookies.iter().flat_map(|h| h.split(';')).any(|cookie| {
            cookie
                .trim()
                .strip_prefix(session_cookie)
                .and_then(|rest| rest.strip_prefix('='))
                .is_some_and(|value| !value.is_empty())
        })
    }
}

//! Client IP resolution behind proxies.
//!
//! Precedence: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
//! transport address. Values are not validated; whatever the header carries
//! (trimmed) is returned.

use crate::request::Request;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Resolve the originating client address for `request`.
pub fn resolve_client_ip(request: &Request) -> String {
    if let Some(ip) = request
        .header(FORWARDED_FOR)
        .and_then(first_forwarded)
    {
        return ip.to_string();
    }

    if let Some(ip) = request
        .header(REAL_IP)
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }

    request.remote_addr.trim().to_string()
}

/// First non-empty comma-separated token of a forwarded chain.
fn first_forwarded(chain: &str) -> Option<&str> {
    chain
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

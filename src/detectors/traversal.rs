//! Path traversal detection.
//!
//! Literal `../` and `..\` sequences plus their URL-encoded and
//! double-encoded spellings, checked against `path?query`.

use super::{InspectTarget, PatternRule, SubstringMatcher};
use crate::event::{EventKind, Severity};

const TRAVERSAL_SEQUENCES: &[&str] = &[
    "../",
    "..\\",
    "..%2f",
    "..%5c",
    "%2e%2e/",
    "%2e%2e\\",
    "%2e%2e%2f",
    "%2e%2e%5c",
    "%252e%252e%252f",
    "%252e%252e%255c",
];

/// Matcher for traversal sequences.
pub fn matcher() -> SubstringMatcher {
    SubstringMatcher::new("path_traversal", TRAVERSAL_SEQUENCES)
}

/// Path traversal rule: high severity, path and query.
pub fn rule() -> PatternRule {
    PatternRule::new(
        EventKind::PathTraversalAttempt,
        Severity::High,
        InspectTarget::PathAndQuery,
        matcher(),
    )
}

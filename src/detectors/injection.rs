//! SQL injection and XSS detection over the raw query string.
//!
//! Query strings arrive encoded, so whitespace may be a space, `+` or `%20`
//! and quotes/brackets may be percent-encoded.

use super::{InspectTarget, PatternRule, RegexSetMatcher};
use crate::event::{EventKind, Severity};
use regex::RegexSet;
use std::sync::LazyLock;

/// SQL injection signatures.
static SQL_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // UNION [ALL] SELECT
        r"(?i)union(?:\s|\+|%20)+(?:all(?:\s|\+|%20)+)?select",
        r"(?i)drop(?:\s|\+|%20)+table",
        r"(?i)insert(?:\s|\+|%20)+into",
        r"(?i)delete(?:\s|\+|%20)+from",
        // ' OR '1'='1 and ' OR 1=1
        r"(?i)(?:'|%27)(?:\s|\+|%20)*or(?:\s|\+|%20)+(?:'|%27)?[^'&]*(?:'|%27)?(?:\s|\+|%20)*(?:=|%3d)",
        // ; DROP
        r"(?i)(?:;|%3b)(?:\s|\+|%20)*drop",
    ])
    .expect("SQL injection patterns are valid")
});

/// Script injection signatures.
static XSS_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)(?:<|%3c)(?:\s|\+|%20)*script",
        r"(?i)javascript(?:\s|\+|%20)*(?::|%3a)",
        // Inline event handler attributes
        r"(?i)\bon(?:load|error|click|dblclick|mouseover|mouseout|mouseenter|focus|blur|submit|change|input|keydown|keyup|keypress|abort|toggle)(?:\s|\+|%20)*(?:=|%3d)",
        r"(?i)eval(?:\s|\+|%20)*(?:\(|%28)",
        r"(?i)(?:<|%3c)(?:\s|\+|%20)*iframe",
    ])
    .expect("XSS patterns are valid")
});

pub fn sql_matcher() -> RegexSetMatcher {
    RegexSetMatcher::new("sql_injection", SQL_PATTERNS.clone())
}

pub fn xss_matcher() -> RegexSetMatcher {
    RegexSetMatcher::new("xss", XSS_PATTERNS.clone())
}

/// SQL injection rule: critical severity, query string.
pub fn sql_rule() -> PatternRule {
    PatternRule::new(
        EventKind::SqlInjectionAttempt,
        Severity::Critical,
        InspectTarget::Query,
        sql_matcher(),
    )
}

/// XSS rule: high severity, query string.
pub fn xss_rule() -> PatternRule {
    PatternRule::new(
        EventKind::XssAttempt,
        Severity::High,
        InspectTarget::Query,
        xss_matcher(),
    )
}

//! Attack pattern detection.
//!
//! Detection is a table of [`PatternRule`]s: each pairs an event kind and
//! severity with a [`Matcher`] applied to one part of the request. Rules are
//! independent; every rule that matches yields its own event.

pub mod injection;
pub mod traversal;
pub mod user_agent;

use crate::config::DetectionConfig;
use crate::event::{EventKind, SecurityEvent, Severity};
use crate::request::Request;
use chrono::Utc;
use regex::RegexSet;

/// Something that can recognise an attack signature in text.
pub trait Matcher: Send + Sync {
    /// True if `text` contains the signature.
    fn matches(&self, text: &str) -> bool;

    /// Get the matcher name.
    fn name(&self) -> &'static str;
}

/// Case-insensitive substring matcher.
pub struct SubstringMatcher {
    name: &'static str,
    /// Lowercased needles
    needles: Vec<String>,
}

impl SubstringMatcher {
    pub fn new<I, S>(name: &'static str, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name,
            needles: needles
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }
}

impl Matcher for SubstringMatcher {
    fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        self.needles.iter().any(|needle| text.contains(needle.as_str()))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Matcher backed by a compiled regex set.
pub struct RegexSetMatcher {
    name: &'static str,
    set: RegexSet,
}

impl RegexSetMatcher {
    pub fn new(name: &'static str, set: RegexSet) -> Self {
        Self { name, set }
    }

    /// Compile `patterns` into a new matcher.
    pub fn from_patterns<I, S>(name: &'static str, patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::new(name, RegexSet::new(patterns)?))
    }
}

impl Matcher for RegexSetMatcher {
    fn matches(&self, text: &str) -> bool {
        !text.is_empty() && self.set.is_match(text)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Which part of the request a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectTarget {
    /// `path?query`
    PathAndQuery,
    /// Raw query string only
    Query,
    /// User-Agent header
    UserAgent,
}

impl InspectTarget {
    fn extract<'a>(&self, request: &'a Request, full_path: &'a str) -> &'a str {
        match self {
            InspectTarget::PathAndQuery => full_path,
            InspectTarget::Query => request.query_str(),
            InspectTarget::UserAgent => request.user_agent().unwrap_or(""),
        }
    }
}

/// One row of the detection table.
pub struct PatternRule {
    pub kind: EventKind,
    pub severity: Severity,
    pub target: InspectTarget,
    pub matcher: Box<dyn Matcher>,
}

impl PatternRule {
    pub fn new(
        kind: EventKind,
        severity: Severity,
        target: InspectTarget,
        matcher: impl Matcher + 'static,
    ) -> Self {
        Self {
            kind,
            severity,
            target,
            matcher: Box::new(matcher),
        }
    }
}

/// Runs every rule against a request. Purely observational.
#[derive(Default)]
pub struct PatternDetector {
    rules: Vec<PatternRule>,
}

impl PatternDetector {
    /// Detector with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with the built-in rules enabled by `config`.
    pub fn from_config(config: &DetectionConfig) -> Self {
        let mut detector = Self::new();

        if config.path_traversal {
            detector = detector.with_rule(traversal::rule());
        }
        if config.sql_injection {
            detector = detector.with_rule(injection::sql_rule());
        }
        if config.xss {
            detector = detector.with_rule(injection::xss_rule());
        }
        if config.suspicious_user_agent {
            detector = detector.with_rule(user_agent::rule(&config.extra_user_agent_tokens));
        }

        detector
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Events for every rule that matches `request` from `ip`.
    pub fn inspect(&self, ip: &str, request: &Request) -> Vec<SecurityEvent> {
        let full_path = request.full_path();
        let timestamp = Utc::now();

        self.rules
            .iter()
            .filter(|rule| rule.matcher.matches(rule.target.extract(request, &full_path)))
            .map(|rule| SecurityEvent {
                kind: rule.kind,
                severity: rule.severity,
                ip: ip.to_string(),
                path: request.path.clone(),
                query: request.query_str().to_string(),
                user_agent: request.user_agent().map(str::to_string),
                tenant_id: request.tenant_id.clone(),
                timestamp,
            })
            .collect()
    }
}

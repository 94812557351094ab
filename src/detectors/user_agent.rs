//! Suspicious User-Agent detection.
//!
//! Flags security scanners, command-line tools and bare HTTP client
//! libraries by case-insensitive substring.

use super::{InspectTarget, PatternRule, SubstringMatcher};
use crate::event::{EventKind, Severity};

/// Known scanning-tool and scripted-client tokens.
const SUSPICIOUS_TOKENS: &[&str] = &[
    // Security scanners
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "zgrab",
    "nuclei",
    "gobuster",
    "dirbuster",
    "wpscan",
    "acunetix",
    "zap",
    "burp",
    // Command-line tools
    "wget",
    "curl",
    "httpie",
    // HTTP client libraries
    "python-requests",
    "python-urllib",
    "aiohttp",
    "go-http-client",
    "java/",
    "libwww-perl",
    "ruby",
    "php/",
];

/// Matcher for the built-in tokens plus `extra`.
pub fn matcher(extra: &[String]) -> SubstringMatcher {
    let tokens = SUSPICIOUS_TOKENS
        .iter()
        .map(|t| t.to_string())
        .chain(extra.iter().cloned());
    SubstringMatcher::new("suspicious_user_agent", tokens)
}

/// Suspicious user agent rule: medium severity, User-Agent header.
pub fn rule(extra: &[String]) -> PatternRule {
    PatternRule::new(
        EventKind::SuspiciousUserAgent,
        Severity::Medium,
        InspectTarget::UserAgent,
        matcher(extra),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Matcher;

    #[test]
    fn test_scanners() {
        let m = matcher(&[]);
        assert!(m.matches("sqlmap/1.7.2#stable (https://sqlmap.org)"));
        assert!(m.matches("Mozilla/5.00 (Nikto/2.1.6)"));
        assert!(m.matches("Mozilla/5.0 (compatible; Nmap Scripting Engine)"));
        assert!(m.matches("masscan/1.3"));
    }

    #[test]
    fn test_scripted_clients() {
        let m = matcher(&[]);
        assert!(m.matches("curl/8.4.0"));
        assert!(m.matches("Wget/1.21"));
        assert!(m.matches("python-requests/2.31.0"));
        assert!(m.matches("Go-http-client/2.0"));
        assert!(m.matches("Java/17.0.2"));
    }

    #[test]
    fn test_browsers_pass() {
        let m = matcher(&[]);
        assert!(!m.matches(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        ));
        assert!(!m.matches("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0"));
        assert!(!m.matches(""));
    }

    #[test]
    fn test_extra_tokens() {
        let m = matcher(&["badcrawler".to_string()]);
        assert!(m.matches("BadCrawler/0.1"));
    }
}

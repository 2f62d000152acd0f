//! Matching of declared request origins against stored origin patterns.
//!
//! Patterns are host-like strings such as `localhost:8000`,
//! `*.example.com` or `https://maps.example.org`. `*` matches any run of
//! characters. A pattern without a scheme matches the origin with its
//! scheme removed. Comparison is case-insensitive and anchored at both
//! ends.

use regex::Regex;

/// A compiled origin pattern.
#[derive(Debug, Clone)]
pub struct OriginPattern {
    regex: Regex,
    has_scheme: bool,
}

impl OriginPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = pattern.trim().to_lowercase();
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            regex: Regex::new(&format!("^{body}$"))?,
            has_scheme: pattern.contains("://"),
        })
    }

    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.trim().to_lowercase();
        let candidate = if self.has_scheme {
            origin.as_str()
        } else {
            strip_scheme(&origin)
        };
        self.regex.is_match(candidate.trim_end_matches('/'))
    }
}

fn strip_scheme(origin: &str) -> &str {
    origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
}

/// Normalized form of a declared origin, used for cache buckets.
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, origin: &str) -> bool {
        OriginPattern::new(pattern).unwrap().matches(origin)
    }

    #[test]
    fn scheme_less_pattern_ignores_scheme() {
        assert!(matches("localhost:8000", "http://localhost:8000"));
        assert!(matches("someorigin.com", "https://someorigin.com"));
        assert!(matches("someorigin.com", "someorigin.com"));
    }

    #[test]
    fn scheme_in_pattern_must_match() {
        assert!(matches("https://maps.example.org", "https://maps.example.org"));
        assert!(!matches("https://maps.example.org", "http://maps.example.org"));
    }

    #[test]
    fn wildcard_matches_any_run() {
        assert!(matches("*.example.com", "https://a.b.example.com"));
        assert!(!matches("*.example.com", "https://example.com"));
        assert!(matches("localhost:*", "http://localhost:3000"));
    }

    #[test]
    fn match_is_anchored_and_case_insensitive() {
        assert!(matches("Example.COM", "https://example.com"));
        assert!(!matches("example.com", "https://example.com.evil.net"));
        assert!(!matches("example.com", "https://notexample.com"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(!matches("example.com", "https://exampleXcom"));
    }
}

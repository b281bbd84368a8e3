//! Pattern-based PII detection.
//!
//! Detection runs an ordered list of matchers. A matcher earlier in the list
//! has priority: the spans it claims are never re-matched by later ones, so
//! one piece of text is tokenized at most once.
use std::fmt;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PiiCategory {
    ApiKey,
    Email,
    CreditCard,
    Ssn,
    IpAddress,
    Phone,
}

impl PiiCategory {
    /// Priority order used by the default detector.
    pub const ALL: [PiiCategory; 6] = [
        PiiCategory::ApiKey,
        PiiCategory::Email,
        PiiCategory::CreditCard,
        PiiCategory::Ssn,
        PiiCategory::IpAddress,
        PiiCategory::Phone,
    ];

    /// Upper-case tag used as the token prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiCategory::ApiKey => "API_KEY",
            PiiCategory::Email => "EMAIL",
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::Ssn => "SSN",
            PiiCategory::IpAddress => "IP_ADDRESS",
            PiiCategory::Phone => "PHONE",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            PiiCategory::ApiKey => r"(?i)\b(?:api[_-]?key|token|secret)[=:\s]+[A-Za-z0-9_-]{20,}\b",
            PiiCategory::Email => r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            PiiCategory::CreditCard => r"\b(?:[0-9]{4}[-\s]?){3}[0-9]{4}\b",
            PiiCategory::Ssn => r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b",
            PiiCategory::IpAddress => r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b",
            PiiCategory::Phone => {
                r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b"
            }
        }
    }
}

impl Serialize for PiiCategory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected span. Offsets are byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub category: PiiCategory,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A strategy for finding one kind of sensitive data.
pub trait PiiMatcher: Send + Sync {
    fn category(&self) -> PiiCategory;

    /// Candidate spans as `(start, end)`, left to right.
    fn find(&self, text: &str) -> Vec<(usize, usize)>;
}

/// Matcher backed by a single regular expression.
pub struct RegexMatcher {
    category: PiiCategory,
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(category: PiiCategory, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            category,
            regex: Regex::new(pattern)?,
        })
    }
}

impl PiiMatcher for RegexMatcher {
    fn category(&self) -> PiiCategory {
        self.category
    }

    fn find(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect()
    }
}

pub struct PiiDetector {
    matchers: Vec<Box<dyn PiiMatcher>>,
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiDetector {
    /// The standard categories in priority order.
    pub fn new() -> Self {
        // Built-in patterns are constants; `test_builtin_patterns_compile` covers them.
        let matchers = PiiCategory::ALL
            .iter()
            .filter_map(|&category| RegexMatcher::new(category, category.pattern()).ok())
            .map(|matcher| Box::new(matcher) as Box<dyn PiiMatcher>)
            .collect();
        Self { matchers }
    }

    /// A detector running `matchers` with priority in list order.
    pub fn with_matchers(matchers: Vec<Box<dyn PiiMatcher>>) -> Self {
        Self { matchers }
    }

    /// Non-overlapping matches, left to right. Deterministic for a given text.
    ///
    /// Each matcher only scans the text not yet claimed by a higher-priority
    /// one, so a lower-priority pattern can still match next to a claimed span.
    pub fn detect(&self, text: &str) -> Matches {
        let mut claimed: Vec<PiiMatch> = Vec::new();
        for matcher in &self.matchers {
            let mut found = Vec::new();
            for (gap_start, gap_end) in unclaimed(&claimed, text.len()) {
                for (start, end) in matcher.find(&text[gap_start..gap_end]) {
                    if start < end {
                        found.push(PiiMatch {
                            category: matcher.category(),
                            start: gap_start + start,
                            end: gap_start + end,
                            text: text[gap_start + start..gap_start + end].to_string(),
                        });
                    }
                }
            }
            claimed.extend(found);
            claimed.sort_by_key(|m| m.start);
        }
        Matches {
            inner: claimed.into_iter(),
        }
    }
}

/// Byte ranges of `0..len` not covered by `claimed` (sorted, disjoint).
fn unclaimed(claimed: &[PiiMatch], len: usize) -> Vec<(usize, usize)> {
    let mut gaps = Vec::with_capacity(claimed.len() + 1);
    let mut cursor = 0;
    for m in claimed {
        if m.start > cursor {
            gaps.push((cursor, m.start));
        }
        cursor = cursor.max(m.end);
    }
    if cursor < len {
        gaps.push((cursor, len));
    }
    gaps
}

/// Iterator over the matches of one [`PiiDetector::detect`] call.
pub struct Matches {
    inner: std::vec::IntoIter<PiiMatch>,
}

impl Iterator for Matches {
    type Item = PiiMatch;

    fn next(&mut self) -> Option<PiiMatch> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Matches {}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> Vec<(PiiCategory, String)> {
        PiiDetector::new()
            .detect(text)
            .map(|m| (m.category, m.text))
            .collect()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        for category in PiiCategory::ALL {
            assert!(Regex::new(category.pattern()).is_ok(), "{category}");
        }
    }

    #[test]
    fn test_each_category() {
        assert_eq!(
            detect("Contact us at john.doe@example.com for more info."),
            vec![(PiiCategory::Email, "john.doe@example.com".to_string())]
        );
        assert_eq!(
            detect("SSN: 123-45-6789"),
            vec![(PiiCategory::Ssn, "123-45-6789".to_string())]
        );
        assert_eq!(
            detect("Card number: 4111-1111-1111-1111"),
            vec![(PiiCategory::CreditCard, "4111-1111-1111-1111".to_string())]
        );
        assert_eq!(
            detect("Server IP: 192.168.1.100"),
            vec![(PiiCategory::IpAddress, "192.168.1.100".to_string())]
        );
        assert_eq!(
            detect("Call 555-123-4567 now"),
            vec![(PiiCategory::Phone, "555-123-4567".to_string())]
        );
        let found = detect("api_key=sk_test_abcdefghijklmnop1234567890");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, PiiCategory::ApiKey);
    }

    #[test]
    fn test_no_pii() {
        assert!(detect("This is a regular message with no personal info.").is_empty());
    }

    #[test]
    fn test_higher_priority_claims_span() {
        // The phone pattern also matches inside the card number.
        let found = detect("pay with 4111 1111 1111 1111 today");
        assert_eq!(found, vec![(PiiCategory::CreditCard, "4111 1111 1111 1111".to_string())]);
    }

    #[test]
    fn test_matches_are_left_to_right() {
        let matches: Vec<PiiMatch> = PiiDetector::new()
            .detect("Phone: 555-111-2222, Email: a@b.com, SSN: 111-22-3333")
            .collect();
        let categories: Vec<_> = matches.iter().map(|m| m.category).collect();
        assert_eq!(
            categories,
            vec![PiiCategory::Phone, PiiCategory::Email, PiiCategory::Ssn]
        );
        assert!(matches.windows(2).all(|w| w[0].end <= w[1].start));
    }

    #[test]
    fn test_lower_priority_matches_beside_claimed_span() {
        // Without gap scanning the phone match would start at the IP's last digit.
        assert_eq!(
            detect("host 10.0.0.1 555-123-4567"),
            vec![
                (PiiCategory::IpAddress, "10.0.0.1".to_string()),
                (PiiCategory::Phone, "555-123-4567".to_string()),
            ]
        );
    }

    #[test]
    fn test_detect_is_repeatable() {
        let detector = PiiDetector::new();
        let text = "a@b.com 10.0.0.1 555-123-4567";
        let first: Vec<_> = detector.detect(text).collect();
        let second: Vec<_> = detector.detect(text).collect();
        assert_eq!(first, second);
        assert_eq!(detector.detect(text).len(), 3);
    }

    #[test]
    fn test_custom_matcher_list() {
        let matcher = RegexMatcher::new(PiiCategory::Email, r"secret-[0-9]+").unwrap();
        let detector = PiiDetector::with_matchers(vec![Box::new(matcher)]);
        let found: Vec<_> = detector.detect("x secret-42 y a@b.com").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "secret-42");
    }
}

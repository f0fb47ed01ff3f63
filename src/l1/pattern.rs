//! Pattern matcher (C3)
//!
//! Supports the five pattern classes spec §4.3 names: exact, prefix
//! (`foo*`), suffix (`*foo`), contains (`*foo*`), and full regex, the
//! last detected by the presence of regex metacharacters rather than a
//! required sigil — a caller may also force regex interpretation with an
//! explicit `re:` prefix, which skips the metacharacter sniff entirely.
//! Compiled regexes are memoized in a bounded LRU so a hot invalidation
//! pattern doesn't recompile on every call, while an attacker (or bug)
//! that generates unbounded distinct patterns can't grow the cache
//! without limit.

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;

use crate::error::CacheError;

/// Patterns longer than this are rejected outright (spec §4.3 edge case).
pub const MAX_PATTERN_LEN: usize = 1024;

/// Upper bound on distinct compiled regexes held in the matcher's cache.
const REGEX_CACHE_CAPACITY: usize = 1024;

enum Matcher {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, key: &str) -> bool {
        match self {
            Matcher::Exact(s) => key == s,
            Matcher::Prefix(p) => key.starts_with(p.as_str()),
            Matcher::Suffix(s) => key.ends_with(s.as_str()),
            Matcher::Contains(s) => key.contains(s.as_str()),
            Matcher::Regex(re) => re.is_match(key),
        }
    }
}

/// Classifies and matches invalidation patterns, memoizing compiled
/// regexes behind a bounded LRU cache keyed by the raw pattern string.
pub struct PatternMatcher {
    regex_cache: Mutex<LruCache<String, Regex>>,
}

impl PatternMatcher {
    /// Create a matcher with the default regex cache capacity.
    pub fn new() -> Self {
        Self {
            regex_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    /// Validate a pattern without matching anything. Rejects empty or
    /// oversized patterns and patterns with unparseable regex syntax.
    pub fn validate(&self, pattern: &str) -> Result<(), CacheError> {
        if pattern.is_empty() {
            return Err(CacheError::Validation("pattern is empty".into()));
        }
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(CacheError::Validation(format!(
                "pattern exceeds {MAX_PATTERN_LEN} bytes"
            )));
        }
        if let Some(expr) = pattern.strip_prefix("re:") {
            Regex::new(expr)
                .map_err(|e| CacheError::Validation(format!("invalid regex: {e}")))?;
        } else if !Self::is_glob(pattern) && Self::looks_like_regex(pattern) {
            Regex::new(pattern)
                .map_err(|e| CacheError::Validation(format!("invalid regex: {e}")))?;
        }
        Ok(())
    }

    /// Does `key` match `pattern`? Unparseable or oversized patterns
    /// match nothing rather than panicking.
    pub fn matches(&self, pattern: &str, key: &str) -> bool {
        match self.classify(pattern) {
            Some(m) => m.matches(key),
            None => false,
        }
    }

    /// `true` for the leading/trailing `*` glob forms, which take
    /// priority over regex auto-detection even if the literal portion
    /// also contains regex metacharacters.
    fn is_glob(pattern: &str) -> bool {
        pattern.starts_with('*') || pattern.ends_with('*')
    }

    /// Spec §4.3 "full regex (detected by presence of regex
    /// metacharacters)": any character outside the glob forms that would
    /// be meaningful to a regex engine routes the pattern to the regex
    /// path without requiring an explicit `re:` sigil.
    fn looks_like_regex(pattern: &str) -> bool {
        pattern.contains(|c: char| {
            matches!(c, '.' | '\\' | '^' | '$' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|')
        })
    }

    fn classify(&self, pattern: &str) -> Option<Matcher> {
        if pattern.is_empty() || pattern.len() > MAX_PATTERN_LEN {
            return None;
        }
        if let Some(expr) = pattern.strip_prefix("re:") {
            return self.compiled_regex(expr).map(Matcher::Regex);
        }
        let starts = pattern.starts_with('*');
        let ends = pattern.ends_with('*');
        match (starts, ends) {
            (true, true) if pattern.len() >= 2 => {
                return Some(Matcher::Contains(pattern[1..pattern.len() - 1].to_string()));
            }
            (true, false) => return Some(Matcher::Suffix(pattern[1..].to_string())),
            (false, true) => return Some(Matcher::Prefix(pattern[..pattern.len() - 1].to_string())),
            _ => {}
        }
        if Self::looks_like_regex(pattern) {
            return self.compiled_regex(pattern).map(Matcher::Regex);
        }
        Some(Matcher::Exact(pattern.to_string()))
    }

    fn compiled_regex(&self, expr: &str) -> Option<Regex> {
        let mut cache = self.regex_cache.lock();
        if let Some(re) = cache.get(expr) {
            return Some(re.clone());
        }
        let re = Regex::new(expr).ok()?;
        cache.put(expr.to_string(), re.clone());
        Some(re)
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A prefix pattern built from an arbitrary key's own leading
        /// bytes always matches that key, and never matches a key that
        /// doesn't start with that prefix.
        #[test]
        fn prefix_pattern_matches_iff_key_starts_with_prefix(
            key in "[a-z]{1,20}",
            other in "[a-z]{1,20}",
            split in 1usize..10,
        ) {
            let m = PatternMatcher::new();
            let cut = split.min(key.len());
            let pattern = format!("{}*", &key[..cut]);
            prop_assert!(m.matches(&pattern, &key));
            prop_assert_eq!(m.matches(&pattern, &other), other.starts_with(&key[..cut]));
        }

        /// An exact pattern (no wildcard markers) matches only the
        /// identical key.
        #[test]
        fn exact_pattern_matches_only_identical_key(key in "[a-z]{1,20}", other in "[a-z]{1,20}") {
            let m = PatternMatcher::new();
            prop_assert!(m.matches(&key, &key));
            prop_assert_eq!(m.matches(&key, &other), key == other);
        }
    }
}

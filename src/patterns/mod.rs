//! Wildcard domain pattern store
//!
//! Loads the operator-maintained pattern list (`*.example.com`, one per
//! non-comment line) and answers membership queries for observed domains.
//! Loading is deliberately infallible: a missing or unreadable pattern file
//! degrades to an empty set so the daemon keeps running and picks the file
//! up on a later reload.

use regex::Regex;
use std::path::Path;

/// A single compiled wildcard pattern
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    /// The configuration line as written, e.g. `*.example.com`
    pub raw: String,
    /// Lowercase base domain with the `*.` prefix stripped
    pub base_domain: String,
    matcher: Regex,
}

impl WildcardPattern {
    /// Compile a configuration line into a pattern.
    ///
    /// Only lines starting with the literal `*.` are accepted; anything else
    /// returns `None`. The matcher accepts the base domain itself and any
    /// label-aligned subdomain, case-insensitively, with an optional
    /// trailing dot.
    fn compile(line: &str) -> Option<Self> {
        let base_domain = line.strip_prefix("*.")?.trim().to_lowercase();
        if base_domain.is_empty() {
            return None;
        }

        let pattern = format!(
            r"^(?i)([a-z0-9_-]+\.)*{}\.?$",
            regex::escape(&base_domain)
        );
        let matcher = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!("Skipping unparseable pattern '{}': {}", line, e);
                return None;
            }
        };

        Some(Self {
            raw: line.to_string(),
            base_domain,
            matcher,
        })
    }

    /// Test an already-normalized domain against this pattern
    pub fn matches(&self, domain: &str) -> bool {
        self.matcher.is_match(domain)
    }
}

/// The full set of loaded wildcard patterns, tested in load order
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<WildcardPattern>,
}

impl PatternSet {
    /// Load patterns from the configuration file.
    ///
    /// Never fails: a missing or unreadable file yields an empty set with a
    /// warning, and malformed non-comment lines are ignored. The returned
    /// set replaces the previous one wholesale so readers never observe a
    /// partially loaded state.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Pattern file not readable: {:?}: {}", path, e);
                return Self::default();
            }
        };

        let mut patterns = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(pattern) = WildcardPattern::compile(line) {
                tracing::debug!("Loaded wildcard pattern: {}", pattern.raw);
                patterns.push(pattern);
            }
        }

        tracing::info!("Loaded {} wildcard patterns from {:?}", patterns.len(), path);
        Self { patterns }
    }

    /// Match a domain against the set, returning the owning base domain.
    ///
    /// The input is normalized (trailing dot stripped, lowercased) before
    /// testing. Patterns are tested in load order and the first match wins.
    pub fn matches(&self, domain: &str) -> Option<&str> {
        let domain = normalize_domain(domain);
        self.patterns
            .iter()
            .find(|p| p.matches(&domain))
            .map(|p| p.base_domain.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Normalize a domain name: strip the trailing dot and lowercase
pub fn normalize_domain(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_patterns(lines: &str) -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("patterns.conf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_load_skips_comments_and_plain_lines() {
        let (_guard, path) = write_patterns(
            "# bypass these\n\n*.example.com\nexample.org\n*.netflix.com\n",
        );
        let set = PatternSet::load(&path);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_missing_file_yields_empty_set() {
        let temp_dir = TempDir::new().unwrap();
        let set = PatternSet::load(&temp_dir.path().join("absent.conf"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_match_base_and_subdomains() {
        let (_guard, path) = write_patterns("*.example.com\n");
        let set = PatternSet::load(&path);

        assert_eq!(set.matches("example.com"), Some("example.com"));
        assert_eq!(set.matches("api.example.com"), Some("example.com"));
        assert_eq!(set.matches("a.b.example.com"), Some("example.com"));
        assert_eq!(set.matches("API.Example.COM."), Some("example.com"));
        assert_eq!(set.matches("example.com."), Some("example.com"));
    }

    #[test]
    fn test_match_is_label_aligned() {
        let (_guard, path) = write_patterns("*.example.com\n");
        let set = PatternSet::load(&path);

        // A suffix that is not label-aligned must not match.
        assert_eq!(set.matches("evilexample.com"), None);
        assert_eq!(set.matches("example.com.evil.net"), None);
        assert_eq!(set.matches("example.org"), None);
    }

    #[test]
    fn test_first_match_wins_in_load_order() {
        let (_guard, path) = write_patterns("*.api.example.com\n*.example.com\n");
        let set = PatternSet::load(&path);

        assert_eq!(set.matches("v2.api.example.com"), Some("api.example.com"));
        assert_eq!(set.matches("www.example.com"), Some("example.com"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Portal.Discover.COM."), "portal.discover.com");
        assert_eq!(normalize_domain("  example.com  "), "example.com");
    }
}

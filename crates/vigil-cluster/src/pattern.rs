//! Matching an endpoint name against a service's configured authority
//! patterns (§3: "allowed checkers (endpoint name patterns)").
//!
//! Patterns are plain strings with an optional single leading or trailing
//! `*` wildcard — `"*"` matches everything, `"sat-*"` matches by prefix,
//! `"*-edge"` matches by suffix, anything else is an exact match.

pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }
    pattern == name
}

pub fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|pattern| matches(pattern, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_everything() {
        assert!(matches("*", "anything"));
    }

    #[test]
    fn prefix_wildcard_matches_by_prefix() {
        assert!(matches("sat-*", "sat-01"));
        assert!(!matches("sat-*", "edge-01"));
    }

    #[test]
    fn suffix_wildcard_matches_by_suffix() {
        assert!(matches("*-edge", "us-edge"));
        assert!(!matches("*-edge", "us-core"));
    }

    #[test]
    fn exact_pattern_requires_exact_match() {
        assert!(matches("master", "master"));
        assert!(!matches("master", "master-2"));
    }

    #[test]
    fn matches_any_checks_every_pattern() {
        let patterns = vec!["sat-*".to_string(), "master".to_string()];
        assert!(matches_any(&patterns, "master"));
        assert!(matches_any(&patterns, "sat-07"));
        assert!(!matches_any(&patterns, "edge-1"));
    }
}

//! Global-state write-pattern matching
//!
//! An automation declares the global keys it may write as a list of patterns:
//! either an exact dotted key (`climate.target`) or a prefix wildcard
//! (`climate.*`) matching every key that starts with `climate.`. A bare `*`
//! grants every key; an empty pattern grants only the empty key.

/// Whether a single pattern grants write access to `key`.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == key {
        return true;
    }
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        // "climate.*" grants "climate.mode" but not "climate" itself.
        return key.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'));
    }
    false
}

/// Whether any of `patterns` grants write access to `key`.
///
/// Patterns are disjunctive: one match suffices.
pub fn can_write(patterns: &[String], key: &str) -> bool {
    patterns.iter().any(|p| pattern_matches(p, key))
}

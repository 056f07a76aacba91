//! MQTT topic filter matching
//!
//! Implements the MQTT-3.1.1 matching rules used for both subscription
//! dispatch and discovery: `+` matches exactly one topic level, `#` matches
//! any number of trailing levels (including zero), and filters starting with
//! a wildcard do not match `$`-prefixed system topics.

/// Whether `filter` matches `topic` under MQTT wildcard semantics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcard filters never match $SYS-style topics.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(part), Some(level)) if part == level => {}
            (None, None) => return true,
            // "a/#" also matches "a" itself.
            (Some("#"), None) => return true,
            _ => return false,
        }
    }
}

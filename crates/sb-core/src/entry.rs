//! Log and captured-message entries
//!
//! These are the records kept in the introspection ring buffers: one per
//! `ctx.log(..)` call or runtime error, and one per message seen on the bus.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single execution log entry, tagged with the automation that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
    /// Id of the automation that produced the entry
    pub automation_id: String,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

impl LogEntry {
    /// Create an info-level entry timestamped now.
    pub fn info(automation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(automation_id, LogLevel::Info, message)
    }

    /// Create an error-level entry timestamped now.
    pub fn error(automation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(automation_id, LogLevel::Error, message)
    }

    fn new(automation_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            automation_id: automation_id.into(),
            level,
            message: message.into(),
        }
    }
}

/// Payload of a captured bus message.
///
/// Classification is by UTF-8 validity, which is a heuristic: a binary
/// protocol that happens to be valid UTF-8 is recorded as text. Acceptable
/// for introspection tooling.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessagePayload {
    /// Valid UTF-8 payload, stored verbatim
    Text { text: String },
    /// Non-UTF-8 payload; only the size is kept
    Binary { size: usize },
}

/// A captured bus message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageEntry {
    /// When the message was seen
    pub timestamp: DateTime<Utc>,
    /// Topic the message arrived on
    pub topic: String,
    /// Payload text or binary marker
    pub payload: MessagePayload,
    /// Payload size in bytes
    pub size: usize,
}

impl MessageEntry {
    /// Capture a raw bus message, classifying the payload.
    pub fn capture(topic: impl Into<String>, payload: &[u8]) -> Self {
        let size = payload.len();
        let payload = match std::str::from_utf8(payload) {
            Ok(text) => MessagePayload::Text {
                text: text.to_string(),
            },
            Err(_) => MessagePayload::Binary { size },
        };
        Self {
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
            size,
        }
    }

    /// Whether the payload was classified as binary.
    pub fn is_binary(&self) -> bool {
        matches!(self.payload, MessagePayload::Binary { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_levels() {
        let info = LogEntry::info("motion", "lights on");
        assert_eq!(info.level, LogLevel::Info);
        assert_eq!(info.automation_id, "motion");

        let err = LogEntry::error("motion", "boom");
        assert_eq!(err.level, LogLevel::Error);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_capture_text_payload() {
        let entry = MessageEntry::capture("home/temp", b"21.5");
        assert!(!entry.is_binary());
        assert_eq!(entry.size, 4);
        match &entry.payload {
            MessagePayload::Text { text } => assert_eq!(text, "21.5"),
            MessagePayload::Binary { .. } => panic!("expected text"),
        }
    }

    #[test]
    fn test_capture_binary_payload() {
        let entry = MessageEntry::capture("home/blob", &[0xff, 0xfe, 0x00]);
        assert!(entry.is_binary());
        assert_eq!(entry.size, 3);
        match entry.payload {
            MessagePayload::Binary { size } => assert_eq!(size, 3),
            MessagePayload::Text { .. } => panic!("expected binary"),
        }
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }
}

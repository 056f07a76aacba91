//! Bounded ring buffers for execution logs and captured bus traffic
//!
//! Fixed-capacity circular buffers: once full, the oldest entry is evicted.
//! Retrieval is always newest-first. The thread-safe wrappers take a write
//! lock only around the insertion point; reads clone a snapshot.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::entry::{LogEntry, MessageEntry};

/// Default capacity for the log buffer.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Default capacity for the captured-message buffer.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 500;

/// A fixed-capacity circular buffer.
#[derive(Debug)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries.
    ///
    /// A zero capacity is bumped to one so `add` always stores something.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn add(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// All entries, newest first.
    pub fn get_all(&self) -> Vec<T> {
        self.entries.iter().rev().cloned().collect()
    }

    /// The most recent `n` entries, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<T> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// Number of stored entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Thread-safe ring buffer of execution log entries.
#[derive(Debug)]
pub struct LogBuffer {
    inner: RwLock<RingBuffer<LogEntry>>,
}

impl LogBuffer {
    /// Create a log buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RingBuffer::new(capacity)),
        }
    }

    /// Append an entry.
    pub fn add(&self, entry: LogEntry) {
        if let Ok(mut buf) = self.inner.write() {
            buf.add(entry);
        }
    }

    /// All entries, newest first.
    pub fn get_all(&self) -> Vec<LogEntry> {
        self.inner.read().map(|b| b.get_all()).unwrap_or_default()
    }

    /// The most recent `n` entries, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<LogEntry> {
        self.inner
            .read()
            .map(|b| b.get_recent(n))
            .unwrap_or_default()
    }

    /// Number of stored entries.
    pub fn count(&self) -> usize {
        self.inner.read().map(|b| b.count()).unwrap_or(0)
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut buf) = self.inner.write() {
            buf.clear();
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Thread-safe ring buffer of captured bus messages.
#[derive(Debug)]
pub struct MessageBuffer {
    inner: RwLock<RingBuffer<MessageEntry>>,
}

impl MessageBuffer {
    /// Create a message buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RingBuffer::new(capacity)),
        }
    }

    /// Capture a raw bus message (topic + payload bytes).
    pub fn record(&self, topic: &str, payload: &[u8]) {
        let entry = MessageEntry::capture(topic, payload);
        if let Ok(mut buf) = self.inner.write() {
            buf.add(entry);
        }
    }

    /// All entries, newest first.
    pub fn get_all(&self) -> Vec<MessageEntry> {
        self.inner.read().map(|b| b.get_all()).unwrap_or_default()
    }

    /// The most recent `n` entries, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<MessageEntry> {
        self.inner
            .read()
            .map(|b| b.get_recent(n))
            .unwrap_or_default()
    }

    /// Number of stored entries.
    pub fn count(&self) -> usize {
        self.inner.read().map(|b| b.count()).unwrap_or(0)
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut buf) = self.inner.write() {
            buf.clear();
        }
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buf = RingBuffer::new(3);
        for i in 0..5 {
            buf.add(i);
        }
        assert_eq!(buf.count(), 3);
        // Newest first; 0 and 1 are gone.
        assert_eq!(buf.get_all(), vec![4, 3, 2]);
    }

    #[test]
    fn test_ring_buffer_newest_first() {
        let mut buf = RingBuffer::new(10);
        buf.add("a");
        buf.add("b");
        buf.add("c");
        assert_eq!(buf.get_all(), vec!["c", "b", "a"]);
        assert_eq!(buf.get_recent(2), vec!["c", "b"]);
    }

    #[test]
    fn test_ring_buffer_recent_larger_than_count() {
        let mut buf = RingBuffer::new(10);
        buf.add(1);
        assert_eq!(buf.get_recent(100), vec![1]);
    }

    #[test]
    fn test_ring_buffer_clear() {
        let mut buf = RingBuffer::new(4);
        buf.add(1);
        buf.add(2);
        buf.clear();
        assert_eq!(buf.count(), 0);
        assert!(buf.get_all().is_empty());
    }

    #[test]
    fn test_ring_buffer_zero_capacity_stores_one() {
        let mut buf = RingBuffer::new(0);
        buf.add(1);
        buf.add(2);
        assert_eq!(buf.get_all(), vec![2]);
    }

    #[test]
    fn test_log_buffer_roundtrip() {
        let buf = LogBuffer::new(2);
        buf.add(LogEntry::info("a", "first"));
        buf.add(LogEntry::info("a", "second"));
        buf.add(LogEntry::error("b", "third"));

        let all = buf.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "third");
        assert_eq!(all[1].message, "second");
        assert_eq!(buf.count(), 2);

        buf.clear();
        assert_eq!(buf.count(), 0);
    }

    #[test]
    fn test_message_buffer_records_and_classifies() {
        let buf = MessageBuffer::new(8);
        buf.record("home/temp", b"21.5");
        buf.record("home/blob", &[0x00, 0xff]);

        let all = buf.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].topic, "home/blob");
        assert!(all[0].is_binary());
        assert_eq!(all[1].topic, "home/temp");
        assert!(!all[1].is_binary());
    }
}

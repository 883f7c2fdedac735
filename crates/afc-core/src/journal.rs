use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 100;
pub const DEFAULT_TRANSCRIPT_CAP_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Operator-facing system log.
///
/// Lossy on purpose: once `capacity` entries are held, every push evicts the
/// oldest entry. Only the recent tail is kept; `dropped` counts what fell off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl Default for SystemLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl SystemLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, level: LogLevel, message: impl Into<String>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(LogEntry {
            at,
            level,
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn tail(&self, count: usize) -> impl Iterator<Item = &LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Append-only agent transcript with a hard byte cap. When the cap is hit the
/// head is cut at a char boundary and `truncated` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    cap_bytes: usize,
    truncated: bool,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::with_cap(DEFAULT_TRANSCRIPT_CAP_BYTES)
    }
}

impl Transcript {
    pub fn with_cap(cap_bytes: usize) -> Self {
        Self {
            text: String::new(),
            cap_bytes: cap_bytes.max(1),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() <= self.cap_bytes {
            return;
        }
        let mut cut = self.text.len() - self.cap_bytes;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
        self.truncated = true;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 21, 0, second).unwrap()
    }

    #[test]
    fn system_log_evicts_oldest_first() {
        let mut log = SystemLog::with_capacity(3);
        for index in 0..5 {
            log.push(at(index), LogLevel::Info, format!("line {index}"));
        }
        let messages: Vec<_> = log.entries().map(|entry| entry.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(log.dropped(), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn clear_forgets_evictions() {
        let mut log = SystemLog::with_capacity(2);
        for index in 0..4 {
            log.push(at(index), LogLevel::Info, format!("line {index}"));
        }
        assert_eq!(log.dropped(), 2);
        log.clear();
        assert_eq!(log.dropped(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn tail_returns_most_recent_entries_in_order() {
        let mut log = SystemLog::default();
        for index in 0..4 {
            log.push(at(index), LogLevel::Warn, format!("w{index}"));
        }
        let tail: Vec<_> = log.tail(2).map(|entry| entry.message.clone()).collect();
        assert_eq!(tail, vec!["w2", "w3"]);
        assert_eq!(log.tail(10).count(), 4);
    }

    #[test]
    fn render_prefixes_clock_time() {
        let mut log = SystemLog::default();
        log.push(at(9), LogLevel::Success, "done");
        assert_eq!(log.entries().next().unwrap().render(), "[21:00:09] done");
    }

    #[test]
    fn transcript_keeps_tail_on_char_boundary() {
        let mut transcript = Transcript::with_cap(5);
        transcript.push("ab");
        transcript.push("cd");
        assert!(!transcript.truncated());
        transcript.push("é!");
        assert!(transcript.truncated());
        assert!(transcript.len() <= 5);
        assert!(transcript.as_str().ends_with("é!"));
    }
}

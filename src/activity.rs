//! Message log for display
//!
//! Keeps the most recent routing results, newest first, already formatted for
//! a human: local timestamp, source name, destination names and a decoded
//! description of the bytes.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

use crate::router::RoutingResult;

pub const MANUAL_SOURCE: &str = "Manual Send";
pub const NO_DESTINATIONS: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS.mmm`
    pub timestamp: String,
    pub source: String,
    pub destinations: Vec<String>,
    pub label: String,
}

impl LogEntry {
    pub fn from_result(result: &RoutingResult, at: DateTime<Local>) -> Self {
        let destinations = if result.destinations.is_empty() {
            vec![NO_DESTINATIONS.to_string()]
        } else {
            result.destinations.clone()
        };

        Self {
            timestamp: at.format("%H:%M:%S%.3f").to_string(),
            source: result
                .source
                .clone()
                .unwrap_or_else(|| MANUAL_SOURCE.to_string()),
            destinations,
            label: result.message.describe(),
        }
    }
}

/// Bounded, newest-first log
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, result: &RoutingResult) -> &LogEntry {
        self.push(LogEntry::from_result(result, Local::now()))
    }

    pub fn push(&mut self, entry: LogEntry) -> &LogEntry {
        trace!("Log: {} -> {:?}: {}", entry.source, entry.destinations, entry.label);
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        &self.entries[0]
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Change the capacity, dropping the oldest entries if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::WireMessage;
    use chrono::TimeZone;

    fn result(source: Option<&str>, destinations: &[&str], bytes: &[u8]) -> RoutingResult {
        RoutingResult {
            source: source.map(str::to_string),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            message: WireMessage::new(bytes).unwrap(),
        }
    }

    #[test]
    fn test_entry_formatting() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
            + chrono::Duration::milliseconds(42);
        let entry = LogEntry::from_result(&result(Some("Keys"), &["Synth"], &[0x91, 60, 100]), at);

        assert_eq!(entry.timestamp, "07:05:03.042");
        assert_eq!(entry.source, "Keys");
        assert_eq!(entry.destinations, vec!["Synth"]);
        assert_eq!(entry.label, "Note On Ch:2 Note:60 Vel:100");
    }

    #[test]
    fn test_manual_send_without_destinations() {
        let entry = LogEntry::from_result(&result(None, &[], &[0xB0, 64, 127]), Local::now());
        assert_eq!(entry.source, MANUAL_SOURCE);
        assert_eq!(entry.destinations, vec![NO_DESTINATIONS]);
    }

    #[test]
    fn test_log_is_bounded_newest_first() {
        let mut log = MessageLog::new(3);
        for value in 0..5u8 {
            log.record(&result(None, &["A"], &[0xB0, 1, value]));
        }

        assert_eq!(log.len(), 3);
        let labels: Vec<_> = log.entries().map(|e| e.label.clone()).collect();
        assert_eq!(
            labels,
            vec![
                "CC Ch:1 Controller:1 Value:4",
                "CC Ch:1 Controller:1 Value:3",
                "CC Ch:1 Controller:1 Value:2",
            ]
        );

        log.set_capacity(1);
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}

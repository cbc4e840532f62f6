// SPDX-License-Identifier: Apache-2.0

//! Multi-line record reassembly.
//!
//! A line matching the start pattern begins a new record; any other line continues
//! the record in progress. Without a start pattern every line is its own record.

use regex::Regex;
use std::time::{Duration, Instant};

use super::reader::Line;

/// A reassembled record and the file offset just past its last line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub text: String,
    pub end_offset: u64,
}

#[derive(Debug)]
struct Pending {
    text: String,
    end_offset: u64,
    last_update: Instant,
}

#[derive(Debug)]
pub struct LineAggregator {
    start_pattern: Option<Regex>,
    flush_timeout: Duration,
    max_record_bytes: usize,
    pending: Option<Pending>,
}

impl LineAggregator {
    pub fn new(start_pattern: Option<Regex>, flush_timeout: Duration, max_record_bytes: usize) -> Self {
        Self {
            start_pattern,
            flush_timeout,
            max_record_bytes,
            pending: None,
        }
    }

    /// Feed one line. Returns a record when the line completes the previous one.
    pub fn push(&mut self, line: Line, now: Instant) -> Option<Assembled> {
        let Some(pattern) = &self.start_pattern else {
            return Some(Assembled {
                text: line.text,
                end_offset: line.end_offset,
            });
        };

        if pattern.is_match(&line.text) {
            let done = self.pending.take().map(Pending::into_assembled);
            self.pending = Some(Pending {
                text: line.text,
                end_offset: line.end_offset,
                last_update: now,
            });
            return done;
        }

        match self.pending.as_mut() {
            Some(pending) => {
                if pending.text.len() + 1 + line.text.len() <= self.max_record_bytes {
                    pending.text.push('\n');
                    pending.text.push_str(&line.text);
                }
                pending.end_offset = line.end_offset;
                pending.last_update = now;
                None
            }
            // Continuation with nothing to continue, e.g. the first line after a restart
            None => {
                self.pending = Some(Pending {
                    text: line.text,
                    end_offset: line.end_offset,
                    last_update: now,
                });
                None
            }
        }
    }

    /// Emit the pending record if no line has arrived for longer than the flush timeout
    pub fn flush_stale(&mut self, now: Instant) -> Option<Assembled> {
        let stale = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.last_update) >= self.flush_timeout);
        if stale { self.flush() } else { None }
    }

    /// Emit the pending record unconditionally
    pub fn flush(&mut self) -> Option<Assembled> {
        self.pending.take().map(Pending::into_assembled)
    }

    /// Discard the pending record, used when the underlying file was reset
    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Pending {
    fn into_assembled(self) -> Assembled {
        Assembled {
            text: self.text,
            end_offset: self.end_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, end: u64) -> Line {
        Line {
            text: text.to_string(),
            end_offset: end,
        }
    }

    fn aggregator() -> LineAggregator {
        let start = Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap();
        LineAggregator::new(Some(start), Duration::from_secs(5), 1024)
    }

    #[test]
    fn test_single_line_mode() {
        let mut agg = LineAggregator::new(None, Duration::from_secs(5), 1024);
        let now = Instant::now();

        let out = agg.push(line("plain", 6), now).unwrap();
        assert_eq!(out.text, "plain");
        assert_eq!(out.end_offset, 6);
        assert!(!agg.has_pending());
    }

    #[test]
    fn test_halt_before_start_pattern() {
        let mut agg = aggregator();
        let now = Instant::now();

        assert!(agg.push(line("2024-01-01 10:00:00 Exception", 10), now).is_none());
        assert!(agg.push(line("  at foo()", 20), now).is_none());
        assert!(agg.push(line("  at bar()", 30), now).is_none());

        let out = agg.push(line("2024-01-01 10:00:01 next", 40), now).unwrap();
        assert_eq!(out.text, "2024-01-01 10:00:00 Exception\n  at foo()\n  at bar()");
        assert_eq!(out.end_offset, 30);

        let last = agg.flush().unwrap();
        assert_eq!(last.text, "2024-01-01 10:00:01 next");
        assert_eq!(last.end_offset, 40);
    }

    #[test]
    fn test_flush_stale_after_timeout() {
        let mut agg = aggregator();
        let start = Instant::now();

        agg.push(line("2024-01-01 10:00:00 only", 10), start);
        assert!(agg.flush_stale(start + Duration::from_secs(1)).is_none());

        let out = agg.flush_stale(start + Duration::from_secs(6)).unwrap();
        assert_eq!(out.end_offset, 10);
        assert!(!agg.has_pending());
    }

    #[test]
    fn test_record_size_is_bounded() {
        let start = Regex::new("^START").unwrap();
        let mut agg = LineAggregator::new(Some(start), Duration::from_secs(5), 12);
        let now = Instant::now();

        agg.push(line("START abc", 10), now);
        agg.push(line("continued line", 25), now);

        let out = agg.flush().unwrap();
        assert_eq!(out.text, "START abc");
        assert_eq!(out.end_offset, 25);
    }
}

//! Append-only session transcript.
//!
//! Sequence numbers are assigned here and never reused. The in-memory copy is
//! bounded: once `capacity` entries are held, the oldest is dropped. The
//! durable record is the event log, which gets every entry as it is appended.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

/// Which side of the terminal produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A line typed by the client.
    In,
    /// Text the honeypot sent back.
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub seq: u64,
    pub direction: Direction,
    pub text: String,
    pub at_millis: u64,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
    next_seq: u64,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            next_seq: 0,
        }
    }

    /// Append an entry, evicting the oldest if full.
    pub fn push(
        &mut self,
        direction: Direction,
        text: impl Into<String>,
        at_millis: u64,
    ) -> &TranscriptEntry {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(TranscriptEntry {
            seq,
            direction,
            text: text.into(),
            at_millis,
        });
        // just pushed
        &self.entries[self.entries.len() - 1]
    }

    /// Entries currently held, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TranscriptEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ever appended, including evicted ones.
    pub fn total(&self) -> u64 {
        self.next_seq
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_increase() {
        let mut t = Transcript::new(8);
        assert_eq!(t.push(Direction::In, "ls", 10).seq, 0);
        assert_eq!(t.push(Direction::Out, "bin etc", 11).seq, 1);
        assert_eq!(t.push(Direction::In, "id", 12).seq, 2);
        assert_eq!(t.total(), 3);
        assert_eq!(t.last().unwrap().text, "id");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut t = Transcript::new(2);
        t.push(Direction::In, "a", 1);
        t.push(Direction::Out, "b", 2);
        t.push(Direction::In, "c", 3);

        let texts: Vec<_> = t.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["b", "c"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.total(), 3);
        assert_eq!(t.iter().next().unwrap().seq, 1);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Out).unwrap(), "\"out\"");
        assert_eq!(Direction::In.to_string(), "in");
    }
}

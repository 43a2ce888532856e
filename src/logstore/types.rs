use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// LogTerm is a monotonically increasing epoch number identifying a
/// leadership period. Comparing terms totally orders leadership changes.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogTerm(u64);

impl LogTerm {
    pub fn new(term: u64) -> Self {
        LogTerm(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn succ(&self) -> LogTerm {
        LogTerm(self.0 + 1)
    }
}

impl fmt::Debug for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LogIndex is the position of an entry within a replicated log, strictly
/// increasing within a term. Index 0 is the sentinel "before the first
/// entry"; real entries start at index 1.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn new(index: u64) -> Self {
        LogIndex(index)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn succ(&self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn plus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0 + delta)
    }

    /// Predecessor index, saturating at the sentinel.
    pub fn pred(&self) -> LogIndex {
        LogIndex(self.0.saturating_sub(1))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position in the log: (term, index). Ordered by term first, then index,
/// which is the order used for conflict detection across leader changes.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermIndexPair {
    pub term: LogTerm,
    pub index: LogIndex,
}

impl TermIndexPair {
    pub fn new(term: LogTerm, index: LogIndex) -> Self {
        TermIndexPair { term, index }
    }

    /// The (0, 0) pair, marking the position before the first entry.
    pub fn start() -> Self {
        TermIndexPair::default()
    }

    pub fn is_start(&self) -> bool {
        self.index.is_zero()
    }
}

impl fmt::Debug for TermIndexPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.term, self.index)
    }
}

/// MessageId correlates asynchronous replication RPCs so stale or duplicate
/// responses can be discarded. Strictly increasing per leader term, never
/// persisted, reset on leadership change.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        MessageId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the current id and advances to the next one.
    pub fn fetch_next(&mut self) -> MessageId {
        self.0 += 1;
        MessageId(self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a log entry. The first entry of every term is the leader's
/// `Meta` barrier; it advances the log but is never handed to the state
/// machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogPayload {
    Data(Bytes),
    Meta,
}

/// An immutable log entry: a position plus a payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub term: LogTerm,
    pub index: LogIndex,
    pub payload: LogPayload,
}

impl LogEntry {
    pub fn new(term: LogTerm, index: LogIndex, payload: Bytes) -> Self {
        LogEntry {
            term,
            index,
            payload: LogPayload::Data(payload),
        }
    }

    pub fn meta(term: LogTerm, index: LogIndex) -> Self {
        LogEntry {
            term,
            index,
            payload: LogPayload::Meta,
        }
    }

    pub fn position(&self) -> TermIndexPair {
        TermIndexPair::new(self.term, self.index)
    }

    /// Approximate in-memory size, used for transaction size accounting.
    pub fn payload_size(&self) -> usize {
        match &self.payload {
            LogPayload::Data(data) => data.len(),
            LogPayload::Meta => 0,
        }
    }
}

use crate::logstore::types::{LogEntry, LogIndex};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("log persistence failed: {0}")]
    Io(#[from] io::Error),

    #[error("appended entries must be contiguous: expected index {expected:?}, got {got:?}")]
    NonContiguous { expected: LogIndex, got: LogIndex },

    #[error("index {0:?} is outside the stored range")]
    OutOfRange(LogIndex),
}

/// LogStore is the durable append-only storage a replicated log participant
/// writes through. Once `append` returns success the entries are at least
/// queued for durable write; with `wait_for_sync` they are synced before the
/// call returns, and `synced_index` reflects that.
///
/// Indexes start at 1. `first_index`/`last_index` return the sentinel 0 while
/// the store is empty.
pub trait LogStore: Send + 'static {
    /// Append a contiguous batch of entries following `last_index`.
    fn append(&mut self, entries: &[LogEntry], wait_for_sync: bool) -> Result<(), StoreError>;

    /// Read the entry at `index`, or None if it is not stored (never written,
    /// truncated away, or compacted).
    fn read(&self, index: LogIndex) -> Result<Option<LogEntry>, StoreError>;

    /// Remove `index` and everything after it. Entries removed this way were
    /// never committed, so hard removal is safe.
    fn truncate_from(&mut self, index: LogIndex) -> Result<(), StoreError>;

    /// Drop stored entries strictly below `index`. Used to release the
    /// applied prefix once the compaction watermark passes it.
    fn compact_up_to(&mut self, index: LogIndex) -> Result<(), StoreError>;

    /// Advance the durable-sync watermark to cover everything appended so
    /// far, returning the new watermark. Models a background fsync pass.
    fn sync(&mut self) -> Result<LogIndex, StoreError>;

    fn first_index(&self) -> LogIndex;

    fn last_index(&self) -> LogIndex;

    /// Furthest index confirmed durable. Reported to the leader so it can
    /// track real persistence progress distinct from in-memory match.
    fn synced_index(&self) -> LogIndex;
}

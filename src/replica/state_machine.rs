use crate::logstore::{LogEntry, LogPayload};
use crate::txn::CommitRecord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// ReplicatedStateMachine is the application core a replicated log drives.
///
/// `apply_entries` is called with committed entries only, exactly once per
/// entry, strictly in index order. Implementations never need to reverse an
/// applied entry. A returned error is treated as an unrecoverable invariant
/// violation by the caller: the log and the applied state can no longer be
/// proven consistent, so the process is taken down rather than allowed to
/// diverge.
pub trait ReplicatedStateMachine: Send + 'static {
    fn apply_entries(&mut self, entries: &[LogEntry]) -> Result<(), ApplyError>;
}

#[derive(Debug, thiserror::Error)]
#[error("state machine apply failed: {message}")]
pub struct ApplyError {
    pub message: String,
}

impl ApplyError {
    pub fn new(message: impl Into<String>) -> Self {
        ApplyError {
            message: message.into(),
        }
    }
}

/// State machine that ignores every entry. Useful for driving the
/// replication protocol in tests that only care about log state.
#[derive(Default)]
pub struct NoOpStateMachine;

impl ReplicatedStateMachine for NoOpStateMachine {
    fn apply_entries(&mut self, _entries: &[LogEntry]) -> Result<(), ApplyError> {
        Ok(())
    }
}

/// Shared read side of a [`DocumentStateMachine`]. The machine itself moves
/// into the replica event loop; this handle stays with the application.
#[derive(Clone, Default)]
pub struct DocumentCounters {
    collections: Arc<Mutex<HashMap<String, u64>>>,
    applied_commits: Arc<AtomicU64>,
}

impl DocumentCounters {
    pub fn document_count(&self, collection: &str) -> u64 {
        self.collections.lock().get(collection).copied().unwrap_or(0)
    }

    pub fn applied_commits(&self) -> u64 {
        self.applied_commits.load(Ordering::SeqCst)
    }
}

/// Document-level application core: applies transaction commit records,
/// keeping a per-collection count of committed documents. This is the glue
/// between the transaction manager's replicated commit markers and
/// externally visible document state.
#[derive(Default)]
pub struct DocumentStateMachine {
    counters: DocumentCounters,
}

impl DocumentStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> DocumentCounters {
        self.counters.clone()
    }
}

impl ReplicatedStateMachine for DocumentStateMachine {
    fn apply_entries(&mut self, entries: &[LogEntry]) -> Result<(), ApplyError> {
        for entry in entries {
            let data = match &entry.payload {
                LogPayload::Data(data) => data,
                LogPayload::Meta => continue,
            };
            let record: CommitRecord = serde_json::from_slice(data)
                .map_err(|e| ApplyError::new(format!("malformed commit record at {:?}: {}", entry.position(), e)))?;
            let mut collections = self.counters.collections.lock();
            for (collection, count) in record.writes {
                *collections.entry(collection).or_insert(0) += count;
            }
            drop(collections);
            self.counters.applied_commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::{LogIndex, LogTerm};
    use crate::txn::TransactionId;
    use bytes::Bytes;

    #[test]
    fn document_state_machine_counts_committed_writes() {
        let mut machine = DocumentStateMachine::new();
        let counters = machine.counters();

        let record = CommitRecord {
            tid: TransactionId::from_parts(1, 7),
            database: "shop".to_string(),
            writes: vec![("products".to_string(), 2)].into_iter().collect(),
        };
        let payload = Bytes::from(serde_json::to_vec(&record).unwrap());
        let entries = vec![
            LogEntry::meta(LogTerm::new(1), LogIndex::new(1)),
            LogEntry::new(LogTerm::new(1), LogIndex::new(2), payload),
        ];

        machine.apply_entries(&entries).unwrap();
        assert_eq!(counters.document_count("products"), 2);
        assert_eq!(counters.document_count("orders"), 0);
        assert_eq!(counters.applied_commits(), 1);
    }

    #[test]
    fn malformed_record_is_an_apply_error() {
        let mut machine = DocumentStateMachine::new();
        let entries = vec![LogEntry::new(
            LogTerm::new(1),
            LogIndex::new(1),
            Bytes::from_static(b"not json"),
        )];
        assert!(machine.apply_entries(&entries).is_err());
    }
}

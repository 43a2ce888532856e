use crate::txn::error::TransactionError;
use crate::txn::hints::Hints;
use crate::txn::id::TransactionId;
use crate::txn::options::TransactionOptions;
use crate::txn::record::CommitRecord;
use std::collections::HashMap;
use std::fmt;

/// How a transaction may touch a collection. Ordered: an exclusive
/// declaration satisfies a write lease, a write declaration a read lease.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessMode {
    Read,
    Write,
    Exclusive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Committed,
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => write!(f, "running"),
            Status::Committed => write!(f, "committed"),
            Status::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CollectionAccess {
    pub name: String,
    pub mode: AccessMode,
}

/// One transaction's relationship to the collections it touches, its hints,
/// and its current status. Owned by exactly one ManagedTrx (or directly by
/// the caller for standalone transactions); mutation requires the owner's
/// lock.
pub struct TransactionState {
    id: TransactionId,
    database: String,
    collections: Vec<CollectionAccess>,
    hints: Hints,
    status: Status,
    max_transaction_size: u64,
    wait_for_sync: bool,
    used_bytes: u64,
    pending_writes: HashMap<String, u64>,
}

impl TransactionState {
    pub fn new(id: TransactionId, database: impl Into<String>, options: &TransactionOptions) -> Self {
        let mut collections = Vec::with_capacity(options.declared_collection_count());
        for name in &options.read_collections {
            collections.push(CollectionAccess {
                name: name.clone(),
                mode: AccessMode::Read,
            });
        }
        for name in &options.write_collections {
            collections.push(CollectionAccess {
                name: name.clone(),
                mode: AccessMode::Write,
            });
        }
        for name in &options.exclusive_collections {
            collections.push(CollectionAccess {
                name: name.clone(),
                mode: AccessMode::Exclusive,
            });
        }

        TransactionState {
            id,
            database: database.into(),
            collections,
            hints: options.hints,
            status: Status::Running,
            max_transaction_size: options.max_transaction_size,
            wait_for_sync: options.wait_for_sync,
            used_bytes: 0,
            pending_writes: HashMap::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn hints(&self) -> Hints {
        self.hints
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }

    pub fn collections(&self) -> &[CollectionAccess] {
        &self.collections
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Widest access mode declared by this transaction; a lease must not
    /// request more than this.
    pub fn max_access_mode(&self) -> AccessMode {
        self.collections
            .iter()
            .map(|c| c.mode)
            .max()
            .unwrap_or(AccessMode::Read)
    }

    fn declared_mode(&self, collection: &str) -> Option<AccessMode> {
        self.collections
            .iter()
            .filter(|c| c.name == collection)
            .map(|c| c.mode)
            .max()
    }

    /// Record one write operation of `bytes` against `collection`. Rejected
    /// when the transaction is finished, the collection was not declared
    /// writable, or the accumulated size would exceed the limit.
    pub fn note_write(&mut self, collection: &str, bytes: u64) -> Result<(), TransactionError> {
        if self.status != Status::Running {
            return Err(TransactionError::Conflict(format!(
                "transaction is {}",
                self.status
            )));
        }
        match self.declared_mode(collection) {
            Some(mode) if mode >= AccessMode::Write => {}
            Some(_) => {
                return Err(TransactionError::Conflict(format!(
                    "collection {} is declared read-only",
                    collection
                )))
            }
            None => return Err(TransactionError::CollectionNotFound(collection.to_string())),
        }
        if self.used_bytes + bytes > self.max_transaction_size {
            return Err(TransactionError::SizeExceeded {
                limit: self.max_transaction_size,
            });
        }
        self.used_bytes += bytes;
        *self.pending_writes.entry(collection.to_string()).or_insert(0) += 1;
        Ok(())
    }

    pub(crate) fn mark_committed(&mut self) -> Result<(), TransactionError> {
        self.transition(Status::Committed)
    }

    pub(crate) fn mark_aborted(&mut self) -> Result<(), TransactionError> {
        self.transition(Status::Aborted)
    }

    fn transition(&mut self, target: Status) -> Result<(), TransactionError> {
        match self.status {
            Status::Running => {
                self.status = target;
                Ok(())
            }
            current if current == target => Ok(()),
            current => Err(TransactionError::AlreadyFinalized { status: current }),
        }
    }

    /// Commit marker for replication: the transaction's pending writes,
    /// keyed by collection.
    pub fn commit_record(&self) -> CommitRecord {
        CommitRecord {
            tid: self.id,
            database: self.database.clone(),
            writes: self.pending_writes.clone(),
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_writes.is_empty()
    }

    pub(crate) fn take_pending_writes(&mut self) -> HashMap<String, u64> {
        std::mem::take(&mut self.pending_writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_options(collections: &[&str]) -> TransactionOptions {
        TransactionOptions::for_writes(collections.iter().map(|c| c.to_string()).collect())
    }

    fn state(options: &TransactionOptions) -> TransactionState {
        TransactionState::new(TransactionId::from_parts(1, 1), "testdb", options)
    }

    #[test]
    fn writes_require_declared_collection() {
        let options = write_options(&["products"]);
        let mut state = state(&options);

        assert!(state.note_write("products", 10).is_ok());
        match state.note_write("orders", 10) {
            Err(TransactionError::CollectionNotFound(name)) => assert_eq!(name, "orders"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn writes_to_read_collection_are_rejected() {
        let mut options = write_options(&["products"]);
        options.read_collections.push("orders".to_string());
        let mut state = state(&options);

        assert!(matches!(
            state.note_write("orders", 1),
            Err(TransactionError::Conflict(_))
        ));
    }

    #[test]
    fn size_limit_is_enforced() {
        let mut options = write_options(&["products"]);
        options.max_transaction_size = 100;
        let mut state = state(&options);

        assert!(state.note_write("products", 60).is_ok());
        match state.note_write("products", 41) {
            Err(TransactionError::SizeExceeded { limit }) => assert_eq!(limit, 100),
            other => panic!("unexpected: {:?}", other.err()),
        }
        // The failed operation did not count toward usage.
        assert_eq!(state.used_bytes(), 60);
        assert!(state.note_write("products", 40).is_ok());
    }

    #[test]
    fn status_transitions_are_terminal() {
        let options = write_options(&["products"]);
        let mut state = state(&options);

        state.mark_committed().unwrap();
        // Repeating the same transition is fine, flipping is not.
        assert!(state.mark_committed().is_ok());
        assert!(matches!(
            state.mark_aborted(),
            Err(TransactionError::AlreadyFinalized {
                status: Status::Committed
            })
        ));
    }

    #[test]
    fn commit_record_counts_operations_per_collection() {
        let options = write_options(&["products", "orders"]);
        let mut state = state(&options);
        state.note_write("products", 10).unwrap();
        state.note_write("products", 10).unwrap();
        state.note_write("orders", 10).unwrap();

        let record = state.commit_record();
        assert_eq!(record.writes.get("products"), Some(&2));
        assert_eq!(record.writes.get("orders"), Some(&1));
    }

    #[test]
    fn max_access_mode_reflects_widest_declaration() {
        let mut options = write_options(&["products"]);
        options.exclusive_collections.push("meta".to_string());
        let state = state(&options);
        assert_eq!(state.max_access_mode(), AccessMode::Exclusive);

        let read_only = TransactionOptions {
            read_collections: vec!["products".to_string()],
            ..TransactionOptions::default()
        };
        let ro_state = TransactionState::new(TransactionId::from_parts(1, 2), "testdb", &read_only);
        assert_eq!(ro_state.max_access_mode(), AccessMode::Read);
    }

    #[test]
    fn no_writes_after_finalization() {
        let options = write_options(&["products"]);
        let mut state = state(&options);
        state.mark_aborted().unwrap();
        assert!(state.note_write("products", 1).is_err());
    }
}

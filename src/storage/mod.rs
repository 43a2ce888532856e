use crate::txn::{TransactionError, TransactionId, TransactionOptions, TransactionState};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One database (vocbase) with its known collections. The physical layout
/// of collections and documents belongs to the storage engine; this handle
/// only carries what transaction validation needs.
pub struct Database {
    name: String,
    collections: RwLock<HashSet<String>>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Database {
            name: name.into(),
            collections: RwLock::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_collection(&self, name: impl Into<String>) {
        self.collections.write().insert(name.into());
    }

    pub fn drop_collection(&self, name: &str) {
        self.collections.write().remove(name);
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains(name)
    }
}

/// Seam to the storage engine. The engine owns collection locking and the
/// physical commit sequencing across collections; the transaction manager
/// only ever sees a single success/failure outcome per transaction.
pub trait StorageEngine: Send + Sync + 'static {
    fn create_transaction_state(
        &self,
        database: &Database,
        id: TransactionId,
        options: &TransactionOptions,
    ) -> Result<TransactionState, TransactionError>;

    /// Atomically commit all of the transaction's mutations. Either every
    /// touched collection observes the commit or none does.
    fn commit(&self, state: &mut TransactionState) -> Result<(), TransactionError>;

    fn abort(&self, state: &mut TransactionState) -> Result<(), TransactionError>;
}

/// In-memory engine: tracks committed write counts per collection. Stands in
/// for a real storage engine in tests and examples.
#[derive(Default)]
pub struct MemoryEngine {
    committed: Mutex<HashMap<String, u64>>,
}

impl MemoryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryEngine::default())
    }

    pub fn committed_writes(&self, collection: &str) -> u64 {
        self.committed.lock().get(collection).copied().unwrap_or(0)
    }
}

impl StorageEngine for MemoryEngine {
    fn create_transaction_state(
        &self,
        database: &Database,
        id: TransactionId,
        options: &TransactionOptions,
    ) -> Result<TransactionState, TransactionError> {
        Ok(TransactionState::new(id, database.name(), options))
    }

    fn commit(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        let writes = state.take_pending_writes();
        let mut committed = self.committed.lock();
        for (collection, count) in writes {
            *committed.entry(collection).or_insert(0) += count;
        }
        Ok(())
    }

    fn abort(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        state.take_pending_writes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_engine_applies_commits_and_discards_aborts() {
        let engine = MemoryEngine::new();
        let database = Database::new("shop");
        database.create_collection("products");

        let options = TransactionOptions::for_writes(vec!["products".to_string()]);
        let mut state = engine
            .create_transaction_state(&database, TransactionId::from_parts(1, 1), &options)
            .unwrap();
        state.note_write("products", 32).unwrap();
        engine.commit(&mut state).unwrap();
        assert_eq!(engine.committed_writes("products"), 1);

        let mut state = engine
            .create_transaction_state(&database, TransactionId::from_parts(1, 2), &options)
            .unwrap();
        state.note_write("products", 32).unwrap();
        engine.abort(&mut state).unwrap();
        assert_eq!(engine.committed_writes("products"), 1);
    }
}

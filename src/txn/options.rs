use crate::txn::hints::Hints;
use tokio::time::Duration;

/// Idle lifetime of a managed transaction before garbage collection may
/// abort it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Upper bound on the accumulated operation size of one transaction.
pub const DEFAULT_MAX_TRANSACTION_SIZE: u64 = 128 * 1024 * 1024;

/// Declared shape of a transaction: the collections it may touch per access
/// mode, its hints, and resource limits.
#[derive(Clone, Debug)]
pub struct TransactionOptions {
    pub read_collections: Vec<String>,
    pub write_collections: Vec<String>,
    pub exclusive_collections: Vec<String>,
    pub hints: Hints,
    pub ttl: Duration,
    pub max_transaction_size: u64,
    pub wait_for_sync: bool,
    /// Permit lazily adding read collections not declared up front.
    pub allow_implicit: bool,
    /// How long a status change waits for concurrent side users to detach.
    pub lock_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            read_collections: Vec::new(),
            write_collections: Vec::new(),
            exclusive_collections: Vec::new(),
            hints: Hints::default(),
            ttl: DEFAULT_TTL,
            max_transaction_size: DEFAULT_MAX_TRANSACTION_SIZE,
            wait_for_sync: false,
            allow_implicit: true,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl TransactionOptions {
    /// Shorthand for a transaction writing the given collections.
    pub fn for_writes(collections: Vec<String>) -> Self {
        TransactionOptions {
            write_collections: collections,
            ..TransactionOptions::default()
        }
    }

    pub fn declared_collection_count(&self) -> usize {
        self.read_collections.len() + self.write_collections.len() + self.exclusive_collections.len()
    }
}

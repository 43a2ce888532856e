use crate::txn::state::Status;

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The referenced transaction id (or its database) is unknown. Distinct
    /// from `AlreadyFinalized` so callers can tell a stale retry from a
    /// genuine error.
    #[error("transaction not found")]
    NotFound,

    /// The transaction has already reached a terminal status. Repeating the
    /// matching commit/abort returns the recorded status instead.
    #[error("transaction already finalized as {status}")]
    AlreadyFinalized { status: Status },

    #[error("transaction precondition failed: {0}")]
    Conflict(String),

    /// A write lease or finalization is already active on the transaction.
    #[error("transaction is currently in use")]
    Busy,

    /// The server refuses new transactions (shutdown or read-only mode).
    #[error("cannot create new transaction")]
    Disallowed,

    #[error("timed out waiting for transaction to become available")]
    LockTimeout,

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("aborted since transaction size limit of {limit} bytes was exceeded")]
    SizeExceeded { limit: u64 },

    #[error("replicating transaction commit failed: {0}")]
    Replication(String),
}

use crate::txn::id::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Commit marker proposed to the replicated log when a write transaction
/// commits. Followers apply it through their state machine, making the
/// transaction's effects visible on every replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub tid: TransactionId,
    pub database: String,
    /// Number of committed write operations per collection.
    pub writes: HashMap<String, u64>,
}

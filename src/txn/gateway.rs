use crate::replica::{ProposeError, ReplicatedLogHandle};
use crate::txn::error::TransactionError;
use crate::txn::id::TransactionId;
use bytes::Bytes;

/// Carries a transaction's commit marker through the replicated log. The
/// call resolves only once the marker is committed by a quorum and applied,
/// so a successful return means the commit is durable cluster-wide.
#[async_trait::async_trait]
pub trait ReplicationHook: Send + Sync + 'static {
    async fn replicate_commit(&self, tid: TransactionId, payload: Bytes) -> Result<(), ProposeError>;
}

/// Dispatches administrative operations to the other coordinators, for
/// cluster-wide fan-out of bulk aborts.
#[async_trait::async_trait]
pub trait CoordinatorGateway: Send + Sync + 'static {
    async fn abort_all_write_transactions(&self, user: &str) -> Result<(), TransactionError>;
}

/// ReplicationHook backed by a local replicated log instance: propose the
/// commit marker, then wait until it is committed.
pub struct LogReplicationHook {
    handle: ReplicatedLogHandle,
}

impl LogReplicationHook {
    pub fn new(handle: ReplicatedLogHandle) -> Self {
        LogReplicationHook { handle }
    }
}

#[async_trait::async_trait]
impl ReplicationHook for LogReplicationHook {
    async fn replicate_commit(&self, _tid: TransactionId, payload: Bytes) -> Result<(), ProposeError> {
        let position = self.handle.propose(payload).await?;
        self.handle.wait_for_commit(position).await
    }
}

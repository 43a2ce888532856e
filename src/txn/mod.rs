mod error;
mod gateway;
mod hints;
mod id;
mod manager;
mod options;
mod record;
mod state;

pub use error::TransactionError;
pub use gateway::CoordinatorGateway;
pub use gateway::LogReplicationHook;
pub use gateway::ReplicationHook;
pub use hints::Hints;
pub use id::TransactionId;
pub use manager::spawn_gc_loop;
pub use manager::GcHandle;
pub use manager::TransactionLease;
pub use manager::TransactionManager;
pub use manager::TransactionManagerConfig;
pub use manager::DEFAULT_TOMBSTONE_TTL;
pub use options::TransactionOptions;
pub use options::DEFAULT_MAX_TRANSACTION_SIZE;
pub use options::DEFAULT_TTL;
pub use record::CommitRecord;
pub use state::AccessMode;
pub use state::CollectionAccess;
pub use state::Status;
pub use state::TransactionState;

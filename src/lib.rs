mod logstore;
mod replica;
mod storage;
mod txn;

pub use logstore::InMemoryLogStore;
pub use logstore::LogEntry;
pub use logstore::LogIndex;
pub use logstore::LogPayload;
pub use logstore::LogStore;
pub use logstore::LogTerm;
pub use logstore::MessageId;
pub use logstore::StoreError;
pub use logstore::TermIndexPair;

pub use replica::spawn_replicated_log;
pub use replica::ActorClient;
pub use replica::ActorExited;
pub use replica::AppendEntriesErrorReason;
pub use replica::AppendEntriesRequest;
pub use replica::AppendEntriesResult;
pub use replica::ApplyError;
pub use replica::CommitStream;
pub use replica::CommittedEntry;
pub use replica::DocumentCounters;
pub use replica::DocumentStateMachine;
pub use replica::LocalNetwork;
pub use replica::LogStatus;
pub use replica::NoOpStateMachine;
pub use replica::ParticipantId;
pub use replica::PeerTransport;
pub use replica::ProposeError;
pub use replica::ReplicatedLogConfig;
pub use replica::ReplicatedLogHandle;
pub use replica::ReplicatedStateMachine;
pub use replica::ReplicationOptions;
pub use replica::RoleChangeError;
pub use replica::RoleSnapshot;
pub use replica::SpawnError;
pub use replica::TransportError;

pub use storage::Database;
pub use storage::MemoryEngine;
pub use storage::StorageEngine;

pub use txn::spawn_gc_loop;
pub use txn::AccessMode;
pub use txn::CollectionAccess;
pub use txn::CommitRecord;
pub use txn::CoordinatorGateway;
pub use txn::GcHandle;
pub use txn::Hints;
pub use txn::LogReplicationHook;
pub use txn::ReplicationHook;
pub use txn::Status;
pub use txn::TransactionError;
pub use txn::TransactionId;
pub use txn::TransactionLease;
pub use txn::TransactionManager;
pub use txn::TransactionManagerConfig;
pub use txn::TransactionOptions;
pub use txn::TransactionState;

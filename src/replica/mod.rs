mod actor;
mod api;
mod commit_stream;
mod core;
mod handle;
mod leader;
mod options;
mod participant;
mod state_machine;
pub(crate) mod timer;
mod transport;
mod wire;

pub use actor::ActorClient;
pub use actor::ActorExited;
pub use api::LogStatus;
pub use api::ProposeError;
pub use api::RoleChangeError;
pub use api::RoleSnapshot;
pub use commit_stream::CommitStream;
pub use commit_stream::CommittedEntry;
pub use handle::spawn_replicated_log;
pub use handle::ReplicatedLogConfig;
pub use handle::ReplicatedLogHandle;
pub use handle::SpawnError;
pub use options::ReplicationOptions;
pub use participant::ParticipantId;
pub use state_machine::ApplyError;
pub use state_machine::DocumentCounters;
pub use state_machine::DocumentStateMachine;
pub use state_machine::NoOpStateMachine;
pub use state_machine::ReplicatedStateMachine;
pub use transport::LocalNetwork;
pub use transport::PeerTransport;
pub use transport::TransportError;
pub use wire::AppendEntriesErrorReason;
pub use wire::AppendEntriesRequest;
pub use wire::AppendEntriesResult;

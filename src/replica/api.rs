use crate::logstore::{LogIndex, LogTerm, MessageId, StoreError, TermIndexPair};
use crate::replica::participant::ParticipantId;
use crate::replica::transport::TransportError;
use crate::replica::wire::AppendEntriesResult;
use bytes::Bytes;

#[derive(Debug)]
pub struct ProposeInput {
    pub payload: Bytes,
}

#[derive(Debug)]
pub struct ProposeOutput {
    pub position: TermIndexPair,
}

#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    #[error("not the leader")]
    NotLeader { leader: Option<ParticipantId> },

    #[error("log instance has resigned")]
    Resigned,

    #[error("a newer leader overwrote this entry before it committed")]
    Superseded,

    #[error("leadership was lost before the entry committed")]
    LeadershipLost,

    #[error("failed to persist log entry")]
    Store(#[from] StoreError),

    #[error("replica event loop has exited")]
    ActorExited,
}

#[derive(Debug)]
pub struct BecomeLeaderInput {
    pub term: LogTerm,
    /// Every participant of the replication group, the new leader included.
    pub participants: Vec<ParticipantId>,
}

#[derive(Debug)]
pub struct BecomeFollowerInput {
    pub term: LogTerm,
    pub leader: Option<ParticipantId>,
}

#[derive(Debug, thiserror::Error)]
pub enum RoleChangeError {
    #[error("requested term {requested:?} is not ahead of current term {current:?}")]
    TermNotNewer { requested: LogTerm, current: LogTerm },

    #[error("log instance has resigned")]
    Resigned,

    #[error("failed to persist term barrier entry")]
    Store(#[from] StoreError),

    #[error("replica event loop has exited")]
    ActorExited,
}

/// Info about an in-flight AppendEntries request, echoed back alongside the
/// peer's reply so the handler can correlate without re-reading the request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub peer: ParticipantId,
    pub term: LogTerm,
    pub message_id: MessageId,
    pub prev_index: LogIndex,
    pub num_entries: usize,
}

#[derive(Debug)]
pub struct AppendEntriesReplyFromPeer {
    pub descriptor: RequestDescriptor,
    pub result: Result<AppendEntriesResult, TransportError>,
}

/// One tick of the leader's replication timer. Ticks carry the term they
/// were armed for; stale ticks are discarded.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationTick {
    pub term: LogTerm,
}

/// Snapshot of a log instance's externally observable state.
#[derive(Debug, Clone)]
pub struct LogStatus {
    pub role: RoleSnapshot,
    pub term: LogTerm,
    pub commit_index: LogIndex,
    pub applied_index: LogIndex,
    pub last_index: LogIndex,
    pub synced_index: LogIndex,
    pub lowest_index_to_keep: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSnapshot {
    Uninitialized,
    Follower { leader: Option<ParticipantId> },
    Leader,
    Resigned,
}

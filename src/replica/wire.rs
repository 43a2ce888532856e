//! Wire representation of the replication RPC. Requests and results are
//! structured self-describing documents; new fields must be additive and
//! absent-tolerant so mixed-version clusters keep interoperating during
//! rolling upgrades.

use crate::logstore::{LogEntry, LogIndex, LogTerm, MessageId, TermIndexPair};
use crate::replica::participant::ParticipantId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesRequest {
    pub leader_term: LogTerm,
    pub leader_id: ParticipantId,
    /// Position the new entries extend. (0, 0) when extending the empty log.
    pub prev_log_entry: TermIndexPair,
    pub leader_commit: LogIndex,
    /// Compaction watermark: followers may drop applied entries below this.
    #[serde(default)]
    pub lowest_index_to_keep: LogIndex,
    pub message_id: MessageId,
    #[serde(default)]
    pub wait_for_sync: bool,
    /// Contiguous entries immediately following `prev_log_entry`.
    /// Structurally shared, so tailing readers keep their view while the
    /// leader keeps appending.
    pub entries: im::Vector<LogEntry>,
}

/// Reason classification for a rejected (or accepted) AppendEntries request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum AppendEntriesErrorReason {
    None,
    /// A different participant claims leadership for the same term.
    InvalidLeaderId,
    /// The request's leader term is behind the recipient's current term.
    WrongTerm,
    /// The request's message id is not newer than one already processed.
    MessageOutdated,
    /// The recipient's log has no matching entry at `prev_log_entry`.
    NoPrevLogMatch,
    /// Durable append failed; carries the storage error message.
    PersistenceFailure(String),
    /// The recipient's log instance has been torn down.
    LostLogCore,
    CommunicationError,
}

impl AppendEntriesErrorReason {
    pub fn error_code(&self) -> u16 {
        match self {
            AppendEntriesErrorReason::None => 0,
            AppendEntriesErrorReason::InvalidLeaderId => 1,
            AppendEntriesErrorReason::WrongTerm => 2,
            AppendEntriesErrorReason::MessageOutdated => 3,
            AppendEntriesErrorReason::NoPrevLogMatch => 4,
            AppendEntriesErrorReason::PersistenceFailure(_) => 5,
            AppendEntriesErrorReason::LostLogCore => 6,
            AppendEntriesErrorReason::CommunicationError => 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesResult {
    pub term: LogTerm,
    pub error_code: u16,
    pub reason: AppendEntriesErrorReason,
    pub message_id: MessageId,
    /// True when the follower holds a snapshot covering its compacted
    /// prefix, so the leader may bootstrap from it instead of backtracking.
    #[serde(default)]
    pub snapshot_available: bool,
    /// Furthest index the follower has confirmed durable.
    #[serde(default)]
    pub sync_index: LogIndex,
    /// Present only with `NoPrevLogMatch`: the highest (term, index)
    /// actually present in the follower's log at or before the requested
    /// position, enabling the leader to backtrack in one round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<TermIndexPair>,
}

impl AppendEntriesResult {
    pub fn ok(term: LogTerm, message_id: MessageId, sync_index: LogIndex) -> Self {
        AppendEntriesResult {
            term,
            error_code: 0,
            reason: AppendEntriesErrorReason::None,
            message_id,
            snapshot_available: false,
            sync_index,
            conflict: None,
        }
    }

    pub fn rejected(term: LogTerm, message_id: MessageId, reason: AppendEntriesErrorReason) -> Self {
        AppendEntriesResult {
            error_code: reason.error_code(),
            term,
            reason,
            message_id,
            snapshot_available: false,
            sync_index: LogIndex::ZERO,
            conflict: None,
        }
    }

    pub fn with_conflict(mut self, conflict: TermIndexPair) -> Self {
        self.conflict = Some(conflict);
        self
    }

    pub fn is_success(&self) -> bool {
        self.reason == AppendEntriesErrorReason::None
    }
}

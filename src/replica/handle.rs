use crate::logstore::{LogIndex, LogStore, LogTerm, StoreError, TermIndexPair};
use crate::replica::actor;
use crate::replica::actor::{ActorClient, ActorExited};
use crate::replica::api::{
    BecomeFollowerInput, BecomeLeaderInput, LogStatus, ProposeError, ProposeInput, ProposeOutput, RoleChangeError,
};
use crate::replica::commit_stream::{create_commit_stream, CommitStream};
use crate::replica::core::{abort_process_handler, ReplicatedLogCore};
use crate::replica::options::{ReplicationOptions, ReplicationOptionsValidated};
use crate::replica::participant::ParticipantId;
use crate::replica::state_machine::ReplicatedStateMachine;
use crate::replica::transport::PeerTransport;
use crate::replica::wire::{AppendEntriesRequest, AppendEntriesResult};
use bytes::Bytes;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct ReplicatedLogConfig<S, M>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    pub logger: slog::Logger,
    pub my_id: ParticipantId,
    pub store: S,
    pub state_machine: M,
    pub options: ReplicationOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("invalid replication options: {0}")]
    InvalidOptions(&'static str),

    #[error("failed to load log from store")]
    Store(#[from] StoreError),
}

/// Create a replicated log instance and start its event loop. Returns the
/// handle used for all interaction plus the stream of applied entries.
///
/// The handle's `actor_client` must be registered with the transport (or an
/// RPC server) so this participant is reachable by its peers.
pub fn spawn_replicated_log<S, M>(
    config: ReplicatedLogConfig<S, M>,
    transport: Arc<dyn PeerTransport>,
) -> Result<(ReplicatedLogHandle, CommitStream), SpawnError>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    let options = ReplicationOptionsValidated::try_from(config.options).map_err(SpawnError::InvalidOptions)?;
    let (publisher, stream) = create_commit_stream();

    let core = ReplicatedLogCore::new(
        config.logger.clone(),
        config.my_id.clone(),
        config.store,
        config.state_machine,
        publisher,
        options.clone(),
        abort_process_handler(config.logger),
    )?;

    let (client, actor) = actor::create(
        options.event_queue_size,
        core,
        transport,
        options.rpc_timeout,
        options.heartbeat_interval,
    );
    tokio::task::spawn(actor.run_event_loop());

    let handle = ReplicatedLogHandle {
        my_id: config.my_id,
        actor_client: client,
    };
    Ok((handle, stream))
}

/// Handle to a running replicated log instance.
#[derive(Clone)]
pub struct ReplicatedLogHandle {
    my_id: ParticipantId,
    actor_client: ActorClient,
}

impl ReplicatedLogHandle {
    pub fn participant_id(&self) -> &ParticipantId {
        &self.my_id
    }

    /// Event-loop client for transport registration.
    pub fn actor_client(&self) -> ActorClient {
        self.actor_client.clone()
    }

    /// Append a payload to the log (leader only). Returns the assigned
    /// position once the entry is locally appended; use `wait_for_commit`
    /// to await quorum.
    pub async fn propose(&self, payload: Bytes) -> Result<TermIndexPair, ProposeError> {
        self.actor_client
            .propose(ProposeInput { payload })
            .await
            .map(|ProposeOutput { position }| position)
    }

    /// Resolve once the entry at `position` is committed by the group, or
    /// fail if it is overwritten or leadership is lost first.
    pub async fn wait_for_commit(&self, position: TermIndexPair) -> Result<(), ProposeError> {
        self.actor_client.wait_for_commit(position).await
    }

    /// Server side of the replication RPC, to be called by the network
    /// layer when a leader's request arrives.
    pub async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, ActorExited> {
        self.actor_client.append_entries(request).await
    }

    pub async fn become_leader(
        &self,
        term: LogTerm,
        participants: Vec<ParticipantId>,
    ) -> Result<(), RoleChangeError> {
        self.actor_client
            .become_leader(BecomeLeaderInput { term, participants })
            .await
    }

    pub async fn become_follower(
        &self,
        term: LogTerm,
        leader: Option<ParticipantId>,
    ) -> Result<(), RoleChangeError> {
        self.actor_client
            .become_follower(BecomeFollowerInput { term, leader })
            .await
    }

    pub async fn resign(&self) -> Result<(), RoleChangeError> {
        self.actor_client.resign().await
    }

    /// Raise the compaction watermark: entries below `index` that are
    /// applied may be released from storage.
    pub async fn release(&self, index: LogIndex) {
        self.actor_client.release(index).await
    }

    pub async fn status(&self) -> Result<LogStatus, ActorExited> {
        self.actor_client.status().await
    }
}

use crate::logstore::{LogIndex, LogStore, TermIndexPair};
use crate::replica::api::{
    AppendEntriesReplyFromPeer, BecomeFollowerInput, BecomeLeaderInput, LogStatus, ProposeError, ProposeInput,
    ProposeOutput, ReplicationTick, RoleChangeError,
};
use crate::replica::core::ReplicatedLogCore;
use crate::replica::state_machine::ReplicatedStateMachine;
use crate::replica::timer::LeaderTimerHandle;
use crate::replica::transport::{PeerTransport, TransportError};
use crate::replica::wire::{AppendEntriesRequest, AppendEntriesResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

pub(crate) fn create<S, M>(
    queue_size: usize,
    core: ReplicatedLogCore<S, M>,
    transport: Arc<dyn PeerTransport>,
    rpc_timeout: Duration,
    heartbeat_interval: Duration,
) -> (ActorClient, ReplicaActor<S, M>)
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    let (tx, rx) = mpsc::channel(queue_size);
    let client = ActorClient { sender: tx };
    let actor = ReplicaActor {
        receiver: rx,
        core,
        transport,
        self_client: client.clone(),
        rpc_timeout,
        heartbeat_interval,
        leader_timer: None,
    };

    (client, actor)
}

enum Event {
    // Leader: assign (term, index), append locally, fan out to followers.
    // Follower/Uninitialized: redirect. Resigned: fail.
    Propose(ProposeInput, Callback<Result<ProposeOutput, ProposeError>>),

    // Resolve once the given position is committed, or fail it if the entry
    // is overwritten or leadership is lost first.
    WaitForCommit(TermIndexPair, Callback<Result<(), ProposeError>>),

    // Server side of the replication RPC; always produces a result document.
    AppendEntries(AppendEntriesRequest, Callback<AppendEntriesResult>),

    // Continuation of an async AppendEntries RPC we initiated as leader.
    AppendEntriesReply(AppendEntriesReplyFromPeer),

    // Leadership is assigned from outside; these drive the role machine.
    BecomeLeader(BecomeLeaderInput, Callback<Result<(), RoleChangeError>>),
    BecomeFollower(BecomeFollowerInput, Callback<Result<(), RoleChangeError>>),
    Resign(Callback<Result<(), RoleChangeError>>),

    // Periodic heartbeat while leader; stale-term ticks are discarded.
    ReplicationTick(ReplicationTick),

    // Raise the compaction watermark.
    Release(LogIndex),

    Status(Callback<LogStatus>),
}

struct Callback<T>(oneshot::Sender<T>);

impl<T> Callback<T> {
    fn send(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// The replica event loop has exited; the log instance is gone.
#[derive(Debug, thiserror::Error)]
#[error("replica event loop has exited")]
pub struct ActorExited;

/// Cheap cloneable handle for talking to a replica event loop.
#[derive(Clone)]
pub struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) async fn propose(&self, input: ProposeInput) -> Result<ProposeOutput, ProposeError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::Propose(input, Callback(tx))).await.is_err() {
            return Err(ProposeError::ActorExited);
        }
        rx.await.unwrap_or(Err(ProposeError::ActorExited))
    }

    pub(crate) async fn wait_for_commit(&self, position: TermIndexPair) -> Result<(), ProposeError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(Event::WaitForCommit(position, Callback(tx)))
            .await
            .is_err()
        {
            return Err(ProposeError::ActorExited);
        }
        rx.await.unwrap_or(Err(ProposeError::ActorExited))
    }

    pub(crate) async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, ActorExited> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(Event::AppendEntries(request, Callback(tx)))
            .await
            .is_err()
        {
            return Err(ActorExited);
        }
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn become_leader(&self, input: BecomeLeaderInput) -> Result<(), RoleChangeError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::BecomeLeader(input, Callback(tx))).await.is_err() {
            return Err(RoleChangeError::ActorExited);
        }
        rx.await.unwrap_or(Err(RoleChangeError::ActorExited))
    }

    pub(crate) async fn become_follower(&self, input: BecomeFollowerInput) -> Result<(), RoleChangeError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(Event::BecomeFollower(input, Callback(tx)))
            .await
            .is_err()
        {
            return Err(RoleChangeError::ActorExited);
        }
        rx.await.unwrap_or(Err(RoleChangeError::ActorExited))
    }

    pub(crate) async fn resign(&self) -> Result<(), RoleChangeError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::Resign(Callback(tx))).await.is_err() {
            return Err(RoleChangeError::ActorExited);
        }
        rx.await.unwrap_or(Err(RoleChangeError::ActorExited))
    }

    pub(crate) async fn release(&self, index: LogIndex) {
        let _ = self.sender.send(Event::Release(index)).await;
    }

    pub(crate) async fn status(&self) -> Result<LogStatus, ActorExited> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Event::Status(Callback(tx))).await.is_err() {
            return Err(ActorExited);
        }
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn replication_tick(&self, tick: ReplicationTick) {
        let _ = self.sender.send(Event::ReplicationTick(tick)).await;
    }

    async fn notify_append_entries_reply(&self, reply: AppendEntriesReplyFromPeer) {
        let _ = self.sender.send(Event::AppendEntriesReply(reply)).await;
    }
}

/// ReplicaActor single-threads all log mutations: events are handled one at
/// a time, handlers are never async, and anything slow (RPC fan-out) runs on
/// spawned tasks that feed results back as events.
pub(crate) struct ReplicaActor<S, M>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    receiver: mpsc::Receiver<Event>,
    core: ReplicatedLogCore<S, M>,
    transport: Arc<dyn PeerTransport>,
    self_client: ActorClient,
    rpc_timeout: Duration,
    heartbeat_interval: Duration,
    leader_timer: Option<LeaderTimerHandle>,
}

impl<S, M> ReplicaActor<S, M>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
            self.after_event();
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Propose(input, callback) => {
                callback.send(self.core.propose(input));
            }
            Event::WaitForCommit(position, callback) => {
                self.core.register_commit_waiter(position, callback.0);
            }
            Event::AppendEntries(request, callback) => {
                callback.send(self.core.handle_append_entries(request));
            }
            Event::AppendEntriesReply(reply) => {
                self.core.handle_append_entries_reply(reply);
            }
            Event::BecomeLeader(input, callback) => {
                callback.send(self.core.become_leader(input));
            }
            Event::BecomeFollower(input, callback) => {
                callback.send(self.core.become_follower(input));
            }
            Event::Resign(callback) => {
                callback.send(self.core.resign());
            }
            Event::ReplicationTick(tick) => {
                self.core.handle_replication_tick(tick);
            }
            Event::Release(index) => {
                self.core.release(index);
            }
            Event::Status(callback) => {
                callback.send(self.core.status());
            }
        }
    }

    /// Post-event bookkeeping: keep the heartbeat timer aligned with the
    /// current role and dispatch any AppendEntries requests the core wants
    /// sent. Each RPC runs on its own task with a deadline and posts its
    /// outcome back to this loop.
    fn after_event(&mut self) {
        if self.core.is_leader() {
            let term = self.core.current_term();
            let stale = self.leader_timer.as_ref().map(|t| t.term() != term).unwrap_or(true);
            if stale {
                self.leader_timer = Some(LeaderTimerHandle::spawn_background_task(
                    self.heartbeat_interval,
                    self.self_client.clone(),
                    term,
                ));
            }
        } else {
            self.leader_timer = None;
        }

        for outbound in self.core.collect_outbound() {
            let transport = self.transport.clone();
            let client = self.self_client.clone();
            let rpc_timeout = self.rpc_timeout;
            tokio::task::spawn(async move {
                let result = match tokio::time::timeout(
                    rpc_timeout,
                    transport.append_entries(&outbound.target, outbound.request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout),
                };
                client
                    .notify_append_entries_reply(AppendEntriesReplyFromPeer {
                        descriptor: outbound.descriptor,
                        result,
                    })
                    .await;
            });
        }
    }
}

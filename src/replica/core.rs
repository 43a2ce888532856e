use crate::logstore::{LogEntry, LogIndex, LogPayload, LogStore, LogTerm, MessageId, TermIndexPair};
use crate::replica::api::{
    AppendEntriesReplyFromPeer, BecomeFollowerInput, BecomeLeaderInput, LogStatus, ProposeError, ProposeInput,
    ProposeOutput, ReplicationTick, RequestDescriptor, RoleChangeError, RoleSnapshot,
};
use crate::replica::commit_stream::{CommitStreamPublisher, CommittedEntry};
use crate::replica::leader::LeaderState;
use crate::replica::options::ReplicationOptionsValidated;
use crate::replica::participant::ParticipantId;
use crate::replica::state_machine::ReplicatedStateMachine;
use crate::replica::wire::{AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult};
use std::cmp;
use std::mem;
use tokio::sync::oneshot;

/// Called when a consistency invariant is violated (state-machine apply
/// failure, attempted truncation of committed entries). The default handler
/// aborts the process: a participant whose log and applied state can no
/// longer be proven consistent must not keep serving. Tests inject a
/// recording handler; if the handler returns, the core resigns so no further
/// operation can observe the divergence.
pub(crate) type FatalHandler = Box<dyn FnMut(&str) + Send>;

pub(crate) fn abort_process_handler(logger: slog::Logger) -> FatalHandler {
    Box::new(move |message| {
        slog::crit!(logger, "Unrecoverable consistency violation: {}", message);
        std::process::abort();
    })
}

enum Role {
    Uninitialized,
    Follower { leader: Option<ParticipantId> },
    Leader(LeaderState),
    Resigned,
}

struct CommitWaiter {
    position: TermIndexPair,
    done: oneshot::Sender<Result<(), ProposeError>>,
}

pub(crate) struct OutboundRequest {
    pub(crate) target: ParticipantId,
    pub(crate) request: AppendEntriesRequest,
    pub(crate) descriptor: RequestDescriptor,
}

/// One participant's replicated log instance: the in-memory tail, term and
/// role bookkeeping, commit/applied indexes, and the state machine applier.
/// All mutation goes through the owning event loop, so methods take
/// `&mut self` and never block.
pub(crate) struct ReplicatedLogCore<S, M>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    logger: slog::Logger,
    my_id: ParticipantId,
    options: ReplicationOptionsValidated,
    store: S,
    // Structurally shared mirror of the stored suffix. Cloning the handle is
    // O(1) and existing clones are never invalidated by later appends.
    tail: im::Vector<LogEntry>,
    current_term: LogTerm,
    role: Role,
    commit_index: LogIndex,
    applied_index: LogIndex,
    lowest_index_to_keep: LogIndex,
    last_received_message_id: MessageId,
    machine: M,
    publisher: CommitStreamPublisher,
    on_fatal: FatalHandler,
    commit_waiters: Vec<CommitWaiter>,
}

impl<S, M> ReplicatedLogCore<S, M>
where
    S: LogStore,
    M: ReplicatedStateMachine,
{
    pub(crate) fn new(
        logger: slog::Logger,
        my_id: ParticipantId,
        store: S,
        machine: M,
        publisher: CommitStreamPublisher,
        options: ReplicationOptionsValidated,
        on_fatal: FatalHandler,
    ) -> Result<Self, crate::logstore::StoreError> {
        let mut tail = im::Vector::new();
        let first = store.first_index();
        if !first.is_zero() {
            let mut index = first;
            while index <= store.last_index() {
                match store.read(index)? {
                    Some(entry) => tail.push_back(entry),
                    None => break,
                }
                index = index.succ();
            }
        }
        let current_term = tail.back().map(|e| e.term).unwrap_or_default();

        Ok(ReplicatedLogCore {
            logger,
            my_id,
            options,
            store,
            tail,
            current_term,
            role: Role::Uninitialized,
            commit_index: LogIndex::ZERO,
            applied_index: LogIndex::ZERO,
            lowest_index_to_keep: LogIndex::ZERO,
            last_received_message_id: MessageId::default(),
            machine,
            publisher,
            on_fatal,
            commit_waiters: Vec::new(),
        })
    }

    // ---- log accessors ----

    fn tail_first_index(tail: &im::Vector<LogEntry>) -> LogIndex {
        tail.front().map(|e| e.index).unwrap_or(LogIndex::ZERO)
    }

    fn tail_term_at(tail: &im::Vector<LogEntry>, index: LogIndex) -> Option<LogTerm> {
        let first = Self::tail_first_index(tail);
        if index.is_zero() || first.is_zero() || index < first {
            return None;
        }
        let offset = (index.as_u64() - first.as_u64()) as usize;
        tail.get(offset).map(|e| e.term)
    }

    fn first_tail_index(&self) -> LogIndex {
        Self::tail_first_index(&self.tail)
    }

    fn last_index(&self) -> LogIndex {
        self.tail.back().map(|e| e.index).unwrap_or(LogIndex::ZERO)
    }

    fn entry_term_at(&self, index: LogIndex) -> Option<LogTerm> {
        Self::tail_term_at(&self.tail, index)
    }

    /// Highest (term, index) actually present at or before `index`, reported
    /// to a leader whose prevLogEntry we could not match.
    fn conflict_pair_at_or_before(&self, index: LogIndex) -> TermIndexPair {
        let probe = cmp::min(index, self.last_index());
        match self.entry_term_at(probe) {
            Some(term) => TermIndexPair::new(term, probe),
            None => TermIndexPair::start(),
        }
    }

    pub(crate) fn current_term(&self) -> LogTerm {
        self.current_term
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    pub(crate) fn status(&self) -> LogStatus {
        let role = match &self.role {
            Role::Uninitialized => RoleSnapshot::Uninitialized,
            Role::Follower { leader } => RoleSnapshot::Follower {
                leader: leader.clone(),
            },
            Role::Leader(_) => RoleSnapshot::Leader,
            Role::Resigned => RoleSnapshot::Resigned,
        };
        LogStatus {
            role,
            term: self.current_term,
            commit_index: self.commit_index,
            applied_index: self.applied_index,
            last_index: self.last_index(),
            synced_index: self.store.synced_index(),
            lowest_index_to_keep: self.lowest_index_to_keep,
        }
    }

    // ---- role transitions ----

    pub(crate) fn become_leader(&mut self, input: BecomeLeaderInput) -> Result<(), RoleChangeError> {
        if matches!(self.role, Role::Resigned) {
            return Err(RoleChangeError::Resigned);
        }
        // A fresh instance may be appointed for the term its recovered log
        // already ends in; an active one needs a strictly newer term.
        let term_ok = if matches!(self.role, Role::Uninitialized) {
            input.term >= self.current_term
        } else {
            input.term > self.current_term
        };
        if !term_ok {
            return Err(RoleChangeError::TermNotNewer {
                requested: input.term,
                current: self.current_term,
            });
        }

        self.fail_waiters(|| ProposeError::LeadershipLost);
        self.current_term = input.term;
        self.last_received_message_id = MessageId::default();

        // First entry of the term: the leader's barrier. Committing it is
        // what transitively commits any prior-term entries still pending.
        let barrier = LogEntry::meta(self.current_term, self.last_index().succ());
        self.store.append(&[barrier.clone()], self.options.wait_for_sync)?;
        self.tail.push_back(barrier);

        self.role = Role::Leader(LeaderState::new(
            &self.my_id,
            input.participants,
            self.last_index().succ(),
        ));
        slog::info!(
            self.logger,
            "Assumed leadership for term {:?} at index {:?}",
            self.current_term,
            self.last_index()
        );

        self.recompute_leader_commit();
        Ok(())
    }

    pub(crate) fn become_follower(&mut self, input: BecomeFollowerInput) -> Result<(), RoleChangeError> {
        if matches!(self.role, Role::Resigned) {
            return Err(RoleChangeError::Resigned);
        }
        if input.term < self.current_term {
            return Err(RoleChangeError::TermNotNewer {
                requested: input.term,
                current: self.current_term,
            });
        }
        self.step_down(input.term, input.leader);
        Ok(())
    }

    pub(crate) fn resign(&mut self) -> Result<(), RoleChangeError> {
        if matches!(self.role, Role::Resigned) {
            return Err(RoleChangeError::Resigned);
        }
        self.fail_waiters(|| ProposeError::Resigned);
        self.role = Role::Resigned;
        slog::info!(self.logger, "Log instance resigned at term {:?}", self.current_term);
        Ok(())
    }

    fn step_down(&mut self, term: LogTerm, leader: Option<ParticipantId>) {
        if term > self.current_term {
            self.last_received_message_id = MessageId::default();
        }
        self.fail_waiters(|| ProposeError::LeadershipLost);
        self.current_term = term;
        slog::info!(self.logger, "Now follower at term {:?}, leader: {:?}", term, leader);
        self.role = Role::Follower { leader };
    }

    // ---- leader operations ----

    pub(crate) fn propose(&mut self, input: ProposeInput) -> Result<ProposeOutput, ProposeError> {
        match &self.role {
            Role::Leader(_) => {}
            Role::Follower { leader } => {
                return Err(ProposeError::NotLeader {
                    leader: leader.clone(),
                })
            }
            Role::Uninitialized => return Err(ProposeError::NotLeader { leader: None }),
            Role::Resigned => return Err(ProposeError::Resigned),
        }

        let entry = LogEntry::new(self.current_term, self.last_index().succ(), input.payload);
        let position = entry.position();
        self.store.append(&[entry.clone()], self.options.wait_for_sync)?;
        self.tail.push_back(entry);

        self.recompute_leader_commit();
        Ok(ProposeOutput { position })
    }

    pub(crate) fn register_commit_waiter(
        &mut self,
        position: TermIndexPair,
        done: oneshot::Sender<Result<(), ProposeError>>,
    ) {
        if matches!(self.role, Role::Resigned) {
            let _ = done.send(Err(ProposeError::Resigned));
            return;
        }
        if position.index <= self.commit_index {
            let outcome = if self.entry_term_at(position.index) == Some(position.term) {
                Ok(())
            } else {
                Err(ProposeError::Superseded)
            };
            let _ = done.send(outcome);
            return;
        }
        match self.entry_term_at(position.index) {
            Some(term) if term == position.term => {
                self.commit_waiters.push(CommitWaiter { position, done });
            }
            // Mismatched term, or the entry is gone: a newer leader already
            // overwrote this position.
            _ => {
                let _ = done.send(Err(ProposeError::Superseded));
            }
        }
    }

    pub(crate) fn handle_replication_tick(&mut self, tick: ReplicationTick) {
        if tick.term != self.current_term {
            return;
        }
        if let Role::Leader(leader_state) = &mut self.role {
            leader_state.mark_all_heartbeat_due();
        }
    }

    /// Build AppendEntries requests for every follower that needs one. The
    /// event loop dispatches them; one request per follower is in flight at
    /// a time, with stale replies filtered by message id.
    pub(crate) fn collect_outbound(&mut self) -> Vec<OutboundRequest> {
        let tail = self.tail.clone();
        let first = Self::tail_first_index(&tail);
        let last = tail.back().map(|e| e.index).unwrap_or(LogIndex::ZERO);
        let current_term = self.current_term;
        let my_id = self.my_id.clone();
        let commit_index = self.commit_index;
        let lowest = self.lowest_index_to_keep;
        let wait_for_sync = self.options.wait_for_sync;
        let max_batch = self.options.max_entries_per_request;
        let logger = self.logger.clone();

        let leader_state = match &mut self.role {
            Role::Leader(leader_state) => leader_state,
            _ => return Vec::new(),
        };

        let candidates: Vec<ParticipantId> = leader_state
            .followers_iter()
            .filter(|(_, p)| p.in_flight.is_none() && !p.needs_snapshot && (p.heartbeat_due || last >= p.next_index))
            .map(|(id, _)| id.clone())
            .collect();

        let mut outbound = Vec::with_capacity(candidates.len());
        for target in candidates {
            let message_id = leader_state.next_message_id();
            let progress = match leader_state.follower_mut(&target) {
                Some(progress) => progress,
                None => continue,
            };

            if !first.is_zero() && progress.next_index < first {
                // Entries the follower needs were compacted away locally.
                slog::warn!(
                    logger,
                    "Cannot serve entries from {:?} to {:?}; snapshot bootstrap required",
                    progress.next_index,
                    target
                );
                progress.needs_snapshot = true;
                continue;
            }

            let prev_index = progress.next_index.pred();
            let prev_log_entry = if prev_index.is_zero() {
                TermIndexPair::start()
            } else {
                match Self::tail_term_at(&tail, prev_index) {
                    Some(term) => TermIndexPair::new(term, prev_index),
                    None => {
                        progress.needs_snapshot = true;
                        continue;
                    }
                }
            };

            let entries = if last >= progress.next_index {
                let offset = (progress.next_index.as_u64() - first.as_u64()) as usize;
                let count = cmp::min((last.as_u64() - progress.next_index.as_u64() + 1) as usize, max_batch);
                tail.clone().skip(offset).take(count)
            } else {
                im::Vector::new()
            };

            let descriptor = RequestDescriptor {
                peer: target.clone(),
                term: current_term,
                message_id,
                prev_index,
                num_entries: entries.len(),
            };
            let request = AppendEntriesRequest {
                leader_term: current_term,
                leader_id: my_id.clone(),
                prev_log_entry,
                leader_commit: commit_index,
                lowest_index_to_keep: lowest,
                message_id,
                wait_for_sync,
                entries,
            };

            progress.in_flight = Some(message_id);
            progress.heartbeat_due = false;
            outbound.push(OutboundRequest {
                target,
                request,
                descriptor,
            });
        }

        outbound
    }

    pub(crate) fn handle_append_entries_reply(&mut self, reply: AppendEntriesReplyFromPeer) {
        if reply.descriptor.term != self.current_term {
            slog::debug!(
                self.logger,
                "Dropping reply for term {:?}; current term is {:?}",
                reply.descriptor.term,
                self.current_term
            );
            return;
        }

        let tail = self.tail.clone();
        let max_rounds = self.options.max_backtrack_rounds;
        let current_term = self.current_term;
        let logger = self.logger.clone();
        let mut adopt_term: Option<LogTerm> = None;

        match &mut self.role {
            Role::Leader(leader_state) => {
                let progress = match leader_state.follower_mut(&reply.descriptor.peer) {
                    Some(progress) => progress,
                    None => {
                        slog::warn!(logger, "Reply from unknown peer {:?}", reply.descriptor.peer);
                        return;
                    }
                };
                if progress.in_flight != Some(reply.descriptor.message_id) {
                    slog::debug!(
                        logger,
                        "Dropping superseded reply {:?} from {:?}",
                        reply.descriptor.message_id,
                        reply.descriptor.peer
                    );
                    return;
                }
                progress.in_flight = None;

                match reply.result {
                    Ok(result) if result.is_success() => {
                        progress.record_success(
                            reply.descriptor.prev_index,
                            reply.descriptor.num_entries,
                            result.sync_index,
                        );
                    }
                    Ok(result) => match result.reason {
                        AppendEntriesErrorReason::NoPrevLogMatch => {
                            progress.rewind(result.conflict, |i| Self::tail_term_at(&tail, i), max_rounds);
                            if progress.needs_snapshot {
                                slog::warn!(
                                    logger,
                                    "Backtracking for {:?} abandoned; snapshot bootstrap required",
                                    reply.descriptor.peer
                                );
                            }
                        }
                        AppendEntriesErrorReason::WrongTerm => {
                            if result.term > current_term {
                                adopt_term = Some(result.term);
                            }
                        }
                        AppendEntriesErrorReason::PersistenceFailure(message) => {
                            slog::warn!(
                                logger,
                                "Peer {:?} failed to persist entries: {}",
                                reply.descriptor.peer,
                                message
                            );
                            progress.sync_index = cmp::max(progress.sync_index, result.sync_index);
                        }
                        AppendEntriesErrorReason::MessageOutdated => {
                            slog::debug!(logger, "Peer {:?} saw our message as outdated", reply.descriptor.peer);
                        }
                        other => {
                            slog::warn!(
                                logger,
                                "AppendEntries rejected by {:?}: {:?}",
                                reply.descriptor.peer,
                                other
                            );
                        }
                    },
                    Err(transport_error) => {
                        slog::debug!(
                            logger,
                            "AppendEntries to {:?} failed: {}",
                            reply.descriptor.peer,
                            transport_error
                        );
                    }
                }
            }
            _ => {
                slog::debug!(logger, "Reply received but no longer leader");
                return;
            }
        }

        if let Some(new_term) = adopt_term {
            slog::info!(logger, "Peer is at newer term {:?}; stepping down", new_term);
            self.step_down(new_term, None);
            return;
        }

        self.recompute_leader_commit();
    }

    /// Advance the commit index to the highest index replicated on a quorum,
    /// counting only entries of the current term directly. Entries from
    /// prior terms commit transitively when a current-term entry commits
    /// over them.
    fn recompute_leader_commit(&mut self) {
        let self_index = if self.options.wait_for_sync {
            self.store.synced_index()
        } else {
            self.last_index()
        };
        let candidate = match &self.role {
            Role::Leader(leader_state) => leader_state.quorum_index(self_index, self.options.wait_for_sync),
            _ => return,
        };
        if candidate <= self.commit_index {
            return;
        }
        if self.entry_term_at(candidate) == Some(self.current_term) {
            self.ratchet_commit(candidate);
        }
    }

    // ---- follower operations ----

    pub(crate) fn handle_append_entries(&mut self, request: AppendEntriesRequest) -> AppendEntriesResult {
        let message_id = request.message_id;

        if matches!(self.role, Role::Resigned) {
            return self.reject(message_id, AppendEntriesErrorReason::LostLogCore);
        }

        // Stale leader: reject without touching anything.
        if request.leader_term < self.current_term {
            return self.reject(message_id, AppendEntriesErrorReason::WrongTerm);
        }

        if request.leader_term > self.current_term {
            self.step_down(request.leader_term, Some(request.leader_id.clone()));
        } else if let Some(reason) = self.check_same_term_leader(&request.leader_id) {
            return self.reject(message_id, reason);
        }

        // Duplicate or reordered request from this leader.
        if request.message_id <= self.last_received_message_id {
            return self.reject(message_id, AppendEntriesErrorReason::MessageOutdated);
        }
        self.last_received_message_id = request.message_id;

        if !Self::entries_are_contiguous(&request) {
            return self.reject(message_id, AppendEntriesErrorReason::CommunicationError);
        }

        // prevLogEntry must match our log at that position.
        let prev = request.prev_log_entry;
        if !prev.is_start() {
            match self.entry_term_at(prev.index) {
                Some(term) if term == prev.term => {}
                _ => {
                    let conflict = self.conflict_pair_at_or_before(prev.index);
                    return self
                        .reject(message_id, AppendEntriesErrorReason::NoPrevLogMatch)
                        .with_conflict(conflict);
                }
            }
        }

        let first = self.first_tail_index();
        if !first.is_zero() && prev.index.succ() < first {
            // Entries would land inside our compacted prefix; the leader
            // must bootstrap from a snapshot instead.
            let conflict = self.conflict_pair_at_or_before(prev.index);
            return self
                .reject(message_id, AppendEntriesErrorReason::NoPrevLogMatch)
                .with_conflict(conflict);
        }

        // Skip entries we already hold; truncate our divergent suffix at the
        // first term mismatch. Entries from an old term at those positions
        // are necessarily uncommitted, so discarding them is safe —
        // truncating at or below the commit index is a fatal invariant
        // violation, never a recoverable conflict.
        let mut to_append: Vec<LogEntry> = Vec::new();
        for entry in request.entries.iter() {
            if !to_append.is_empty() {
                to_append.push(entry.clone());
                continue;
            }
            match self.entry_term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if entry.index <= self.commit_index {
                        let message = format!(
                            "leader {:?} asks to overwrite committed entry at {:?} (commit index {:?})",
                            request.leader_id, entry.index, self.commit_index
                        );
                        slog::crit!(self.logger, "{}", message);
                        (self.on_fatal)(&message);
                        self.role = Role::Resigned;
                        return self.reject(message_id, AppendEntriesErrorReason::LostLogCore);
                    }
                    if let Err(e) = self.truncate_suffix(entry.index) {
                        return self.reject(message_id, AppendEntriesErrorReason::PersistenceFailure(e.to_string()));
                    }
                    to_append.push(entry.clone());
                }
                None => to_append.push(entry.clone()),
            }
        }

        if !to_append.is_empty() {
            if let Err(e) = self.store.append(&to_append, request.wait_for_sync) {
                // Reported to the leader rather than swallowed: it needs an
                // accurate view of our persistence progress.
                return self.reject(message_id, AppendEntriesErrorReason::PersistenceFailure(e.to_string()));
            }
            for entry in to_append {
                self.tail.push_back(entry);
            }
        }

        self.lowest_index_to_keep = cmp::max(self.lowest_index_to_keep, request.lowest_index_to_keep);

        // Commit no further than the entries this request vouched for.
        let last_new = prev.index.plus(request.entries.len() as u64);
        self.ratchet_commit(cmp::min(request.leader_commit, last_new));
        self.maybe_compact();

        self.finish(AppendEntriesResult::ok(
            self.current_term,
            message_id,
            self.store.synced_index(),
        ))
    }

    /// Same-term request: verify the sender is the leader we know. Returns a
    /// rejection reason, or None if the request may proceed.
    fn check_same_term_leader(&mut self, sender: &ParticipantId) -> Option<AppendEntriesErrorReason> {
        match &mut self.role {
            Role::Leader(_) => {
                slog::error!(
                    self.logger,
                    "Second leader {:?} claims our term {:?}",
                    sender,
                    self.current_term
                );
                Some(AppendEntriesErrorReason::InvalidLeaderId)
            }
            Role::Follower { leader } => match leader {
                Some(known) if known != sender => Some(AppendEntriesErrorReason::InvalidLeaderId),
                Some(_) => None,
                None => {
                    *leader = Some(sender.clone());
                    None
                }
            },
            Role::Uninitialized => {
                self.role = Role::Follower {
                    leader: Some(sender.clone()),
                };
                None
            }
            Role::Resigned => Some(AppendEntriesErrorReason::LostLogCore),
        }
    }

    fn entries_are_contiguous(request: &AppendEntriesRequest) -> bool {
        let mut expected = request.prev_log_entry.index.succ();
        for entry in request.entries.iter() {
            if entry.index != expected {
                return false;
            }
            expected = expected.succ();
        }
        true
    }

    fn reject(&self, message_id: MessageId, reason: AppendEntriesErrorReason) -> AppendEntriesResult {
        self.finish(AppendEntriesResult::rejected(self.current_term, message_id, reason))
    }

    fn finish(&self, mut result: AppendEntriesResult) -> AppendEntriesResult {
        result.sync_index = self.store.synced_index();
        result.snapshot_available = self.first_tail_index() > LogIndex::new(1);
        result
    }

    // ---- commit / apply / compaction ----

    fn ratchet_commit(&mut self, new_commit: LogIndex) {
        let bounded = cmp::min(new_commit, self.last_index());
        if bounded <= self.commit_index {
            return;
        }
        slog::debug!(self.logger, "Commit index {:?} -> {:?}", self.commit_index, bounded);
        self.commit_index = bounded;
        self.apply_committed();
        self.resolve_commit_waiters();
        self.maybe_compact();
    }

    fn apply_committed(&mut self) {
        if self.applied_index >= self.commit_index {
            return;
        }
        let first = self.first_tail_index();
        let start = cmp::max(self.applied_index.succ(), first);
        let mut batch = Vec::with_capacity((self.commit_index.as_u64() - start.as_u64() + 1) as usize);
        let mut index = start;
        while index <= self.commit_index {
            let offset = (index.as_u64() - first.as_u64()) as usize;
            match self.tail.get(offset) {
                Some(entry) => batch.push(entry.clone()),
                None => break,
            }
            index = index.succ();
        }

        match self.machine.apply_entries(&batch) {
            Ok(()) => {
                for entry in &batch {
                    if let LogPayload::Data(data) = &entry.payload {
                        self.publisher.notify_applied(
                            &self.logger,
                            CommittedEntry {
                                position: entry.position(),
                                payload: data.clone(),
                            },
                        );
                    }
                }
                self.applied_index = self.commit_index;
            }
            Err(e) => {
                let message = format!("applying committed entries up to {:?} failed: {}", self.commit_index, e);
                slog::crit!(self.logger, "{}", message);
                (self.on_fatal)(&message);
                self.role = Role::Resigned;
            }
        }
    }

    fn resolve_commit_waiters(&mut self) {
        let waiters = mem::take(&mut self.commit_waiters);
        for waiter in waiters {
            if waiter.position.index <= self.commit_index {
                let outcome = if self.entry_term_at(waiter.position.index) == Some(waiter.position.term) {
                    Ok(())
                } else {
                    Err(ProposeError::Superseded)
                };
                let _ = waiter.done.send(outcome);
            } else {
                self.commit_waiters.push(waiter);
            }
        }
    }

    fn fail_waiters<F>(&mut self, error: F)
    where
        F: Fn() -> ProposeError,
    {
        for waiter in mem::take(&mut self.commit_waiters) {
            let _ = waiter.done.send(Err(error()));
        }
    }

    fn truncate_suffix(&mut self, from: LogIndex) -> Result<(), crate::logstore::StoreError> {
        self.store.truncate_from(from)?;
        let first = self.first_tail_index();
        if !first.is_zero() && from >= first {
            let keep = (from.as_u64() - first.as_u64()) as usize;
            self.tail.truncate(keep);
        }
        // Anything at or past the cut will never commit as proposed.
        let waiters = mem::take(&mut self.commit_waiters);
        for waiter in waiters {
            if waiter.position.index >= from {
                let _ = waiter.done.send(Err(ProposeError::Superseded));
            } else {
                self.commit_waiters.push(waiter);
            }
        }
        Ok(())
    }

    /// Raise the compaction watermark. Entries below it that are already
    /// applied are released from the store and the in-memory tail.
    pub(crate) fn release(&mut self, index: LogIndex) {
        self.lowest_index_to_keep = cmp::max(self.lowest_index_to_keep, index);
        self.maybe_compact();
    }

    fn maybe_compact(&mut self) {
        let first = self.first_tail_index();
        if first.is_zero() {
            return;
        }
        // Keep the latest entry: it anchors the prevLogEntry check for
        // whatever the leader sends next.
        let bound = cmp::min(
            cmp::min(self.lowest_index_to_keep, self.applied_index.succ()),
            self.last_index(),
        );
        if bound <= first {
            return;
        }
        if let Err(e) = self.store.compact_up_to(bound) {
            slog::warn!(self.logger, "Log compaction up to {:?} failed: {}", bound, e);
            return;
        }
        let drop_count = (bound.as_u64() - first.as_u64()) as usize;
        self.tail = self.tail.clone().skip(drop_count);
    }
}

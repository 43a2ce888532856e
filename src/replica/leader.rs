use crate::logstore::{LogIndex, LogTerm, MessageId, TermIndexPair};
use crate::replica::participant::ParticipantId;
use std::cmp;
use std::collections::HashMap;

/// Per-term leader bookkeeping: one progress tracker per follower plus the
/// message id counter for in-flight RPC correlation.
pub(crate) struct LeaderState {
    followers: HashMap<ParticipantId, FollowerProgress>,
    next_message_id: MessageId,
}

impl LeaderState {
    /// `participants` is the whole replication group; the leader's own id is
    /// filtered out. New followers start optimistically at `next_index` just
    /// past the leader's log and are walked back on conflict.
    pub(crate) fn new(my_id: &ParticipantId, participants: Vec<ParticipantId>, next_index: LogIndex) -> Self {
        let followers = participants
            .into_iter()
            .filter(|p| p != my_id)
            .map(|p| (p, FollowerProgress::new(next_index)))
            .collect();

        LeaderState {
            followers,
            next_message_id: MessageId::default(),
        }
    }

    pub(crate) fn follower_mut(&mut self, id: &ParticipantId) -> Option<&mut FollowerProgress> {
        self.followers.get_mut(id)
    }

    pub(crate) fn followers_iter(&self) -> impl Iterator<Item = (&ParticipantId, &FollowerProgress)> {
        self.followers.iter()
    }

    pub(crate) fn followers_iter_mut(&mut self) -> impl Iterator<Item = (&ParticipantId, &mut FollowerProgress)> {
        self.followers.iter_mut()
    }

    pub(crate) fn next_message_id(&mut self) -> MessageId {
        self.next_message_id.fetch_next()
    }

    pub(crate) fn mark_all_heartbeat_due(&mut self) {
        for progress in self.followers.values_mut() {
            progress.heartbeat_due = true;
        }
    }

    /// Highest index replicated on a quorum of the group, the leader
    /// included. `self_index` is the leader's own contribution (its last or
    /// synced index depending on durability policy); followers contribute
    /// their match or sync index the same way.
    pub(crate) fn quorum_index(&self, self_index: LogIndex, use_sync: bool) -> LogIndex {
        let mut indexes: Vec<LogIndex> = self
            .followers
            .values()
            .map(|p| if use_sync { p.sync_index } else { p.match_index })
            .collect();
        indexes.push(self_index);
        quorum_commit_index(indexes)
    }
}

/// Largest index i such that a majority of participants report an index
/// >= i. With indexes sorted ascending that is the element at (n - 1) / 2.
fn quorum_commit_index(mut indexes: Vec<LogIndex>) -> LogIndex {
    indexes.sort_unstable();
    indexes[(indexes.len() - 1) / 2]
}

/// Leader's view of one follower's replication progress.
pub(crate) struct FollowerProgress {
    /// Next log index to send.
    pub(crate) next_index: LogIndex,
    /// Highest index known replicated on the follower.
    pub(crate) match_index: LogIndex,
    /// Highest index the follower confirmed durable.
    pub(crate) sync_index: LogIndex,
    /// Message id of the outstanding request, if any. One request per
    /// follower is in flight at a time; replies with any other id are stale
    /// and discarded.
    pub(crate) in_flight: Option<MessageId>,
    /// Consecutive conflict-rewind rounds without a successful append.
    pub(crate) backtrack_rounds: u32,
    /// Set once backtracking is abandoned; the follower must be
    /// bootstrapped from a snapshot before replication resumes.
    pub(crate) needs_snapshot: bool,
    /// Forces a send on the next dispatch round even with no new entries.
    pub(crate) heartbeat_due: bool,
}

impl FollowerProgress {
    fn new(next_index: LogIndex) -> Self {
        FollowerProgress {
            next_index,
            match_index: LogIndex::ZERO,
            sync_index: LogIndex::ZERO,
            in_flight: None,
            backtrack_rounds: 0,
            needs_snapshot: false,
            heartbeat_due: true,
        }
    }

    pub(crate) fn record_success(&mut self, prev_index: LogIndex, num_entries: usize, sync_index: LogIndex) {
        let matched = prev_index.plus(num_entries as u64);
        self.match_index = cmp::max(self.match_index, matched);
        self.next_index = cmp::max(self.next_index, matched.succ());
        self.sync_index = cmp::max(self.sync_index, sync_index);
        self.backtrack_rounds = 0;
    }

    /// Walk `next_index` back after a NoPrevLogMatch rejection. The conflict
    /// pair reported by the follower lets us land on the common prefix in a
    /// single round when it is still present in our log; without it we fall
    /// back to stepping one entry at a time. After `max_rounds` fruitless
    /// rounds the follower is marked for snapshot bootstrap instead.
    pub(crate) fn rewind<F>(&mut self, conflict: Option<TermIndexPair>, local_term_at: F, max_rounds: u32)
    where
        F: Fn(LogIndex) -> Option<LogTerm>,
    {
        self.backtrack_rounds += 1;
        if self.backtrack_rounds > max_rounds {
            self.needs_snapshot = true;
            return;
        }

        let new_next = match conflict {
            Some(c) if c.is_start() => LogIndex::new(1),
            Some(c) => {
                if local_term_at(c.index) == Some(c.term) {
                    // Follower's log matches ours through the conflict entry.
                    c.index.succ()
                } else {
                    cmp::max(c.index, LogIndex::new(1))
                }
            }
            None => cmp::max(self.next_index.pred(), LogIndex::new(1)),
        };

        // Never move forward on a rejection; that would loop.
        self.next_index = cmp::min(new_next, cmp::max(self.next_index.pred(), LogIndex::new(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(v: u64) -> LogIndex {
        LogIndex::new(v)
    }

    fn quorum(values: Vec<u64>) -> u64 {
        quorum_commit_index(values.into_iter().map(LogIndex::new).collect()).as_u64()
    }

    #[test]
    fn quorum_index_across_group_sizes() {
        // 1-group: leader alone commits its own entries.
        assert_eq!(quorum(vec![7]), 7);

        // 3-group
        assert_eq!(quorum(vec![10, 0, 0]), 0);
        assert_eq!(quorum(vec![10, 9, 0]), 9);
        assert_eq!(quorum(vec![10, 9, 8]), 9);

        // 4-group: majority is 3.
        assert_eq!(quorum(vec![10, 9, 0, 0]), 0);
        assert_eq!(quorum(vec![10, 9, 8, 0]), 8);

        // 5-group
        assert_eq!(quorum(vec![10, 9, 0, 0, 0]), 0);
        assert_eq!(quorum(vec![10, 9, 8, 0, 0]), 8);
        assert_eq!(quorum(vec![10, 9, 8, 7, 6]), 8);

        // Ordering of inputs is irrelevant.
        assert_eq!(quorum(vec![0, 8, 10, 0, 9]), 8);
    }

    #[test]
    fn record_success_advances_monotonically() {
        let mut progress = FollowerProgress::new(idx(5));
        progress.record_success(idx(4), 3, idx(6));
        assert_eq!(progress.match_index, idx(7));
        assert_eq!(progress.next_index, idx(8));
        assert_eq!(progress.sync_index, idx(6));

        // A late reply about an older request must not move anything back.
        progress.record_success(idx(2), 1, idx(3));
        assert_eq!(progress.match_index, idx(7));
        assert_eq!(progress.next_index, idx(8));
        assert_eq!(progress.sync_index, idx(6));
    }

    #[test]
    fn rewind_uses_conflict_pair_when_log_matches() {
        // Leader log: term 4 through index 12, term 5 from 13.
        let local_term_at = |i: LogIndex| -> Option<LogTerm> {
            if i.is_zero() || i > idx(20) {
                None
            } else if i <= idx(12) {
                Some(LogTerm::new(4))
            } else {
                Some(LogTerm::new(5))
            }
        };

        let mut progress = FollowerProgress::new(idx(16));
        progress.rewind(Some(TermIndexPair::new(LogTerm::new(4), idx(12))), local_term_at, 8);
        // Conflict entry matches our log: resend from 13 onward.
        assert_eq!(progress.next_index, idx(13));
        assert!(!progress.needs_snapshot);
    }

    #[test]
    fn rewind_lands_on_conflict_index_when_terms_differ() {
        let local_term_at = |_: LogIndex| Some(LogTerm::new(7));

        let mut progress = FollowerProgress::new(idx(10));
        progress.rewind(Some(TermIndexPair::new(LogTerm::new(3), idx(6))), local_term_at, 8);
        assert_eq!(progress.next_index, idx(6));
    }

    #[test]
    fn rewind_without_conflict_steps_back_one() {
        let mut progress = FollowerProgress::new(idx(10));
        progress.rewind(None, |_| None, 8);
        assert_eq!(progress.next_index, idx(9));
    }

    #[test]
    fn rewind_is_strictly_decreasing() {
        // Hostile conflict pair pointing past our next index must not move
        // next_index forward.
        let local_term_at = |_: LogIndex| Some(LogTerm::new(2));
        let mut progress = FollowerProgress::new(idx(5));
        progress.rewind(Some(TermIndexPair::new(LogTerm::new(2), idx(9))), local_term_at, 8);
        assert!(progress.next_index < idx(5));
    }

    #[test]
    fn rewind_gives_up_after_max_rounds() {
        let mut progress = FollowerProgress::new(idx(100));
        for _ in 0..3 {
            progress.rewind(None, |_| None, 2);
        }
        assert!(progress.needs_snapshot);
    }

    #[test]
    fn leader_state_excludes_self_from_followers() {
        let me = ParticipantId::new("a");
        let state = LeaderState::new(
            &me,
            vec![
                ParticipantId::new("a"),
                ParticipantId::new("b"),
                ParticipantId::new("c"),
            ],
            idx(1),
        );
        assert_eq!(state.followers_iter().count(), 2);
    }
}

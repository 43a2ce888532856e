bitflags::bitflags! {
    /// Execution-policy flags of a transaction. Hints are fixed at
    /// transaction start and read-only afterward; they are plain
    /// configuration, protected only by the enclosing transaction's own
    /// synchronization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hints: u32 {
        /// Transaction consists of exactly one operation on one collection.
        const SINGLE_OPERATION = 1;
        /// Collection locks are never taken.
        const LOCK_NEVER = 1 << 1;
        /// Skip deadlock detection for this transaction.
        const NO_DEADLOCK_DETECTION = 1 << 2;
        /// Intermediate commits may be triggered once size thresholds hit.
        const INTERMEDIATE_COMMITS = 1 << 3;
        /// Whole-range removals are permitted.
        const ALLOW_RANGE_DELETE = 1 << 4;
        /// Standalone transaction spawned for a single query.
        const AQL_STANDALONE = 1 << 5;
        /// Lifetime is managed externally, across multiple requests.
        const GLOBAL_MANAGED = 1 << 6;
        /// Transaction drives an index build.
        const INDEX_CREATION = 1 << 7;
        /// Replicates a leader's transaction on a follower.
        const IS_FOLLOWER_TRX = 1 << 8;
        /// Try a fast lock round before falling back to queued locking.
        const ALLOW_FAST_LOCK_ROUND = 1 << 9;
    }
}

impl Hints {
    pub fn is_single_operation(&self) -> bool {
        self.contains(Hints::SINGLE_OPERATION)
    }

    pub fn has_intermediate_commits(&self) -> bool {
        self.contains(Hints::INTERMEDIATE_COMMITS)
    }

    pub fn allows_range_delete(&self) -> bool {
        self.contains(Hints::ALLOW_RANGE_DELETE)
    }

    pub fn is_aql_standalone(&self) -> bool {
        self.contains(Hints::AQL_STANDALONE)
    }

    pub fn is_globally_managed(&self) -> bool {
        self.contains(Hints::GLOBAL_MANAGED)
    }

    pub fn is_follower_transaction(&self) -> bool {
        self.contains(Hints::IS_FOLLOWER_TRX)
    }

    pub fn skips_deadlock_detection(&self) -> bool {
        self.contains(Hints::NO_DEADLOCK_DETECTION)
    }

    pub fn allows_fast_lock_round(&self) -> bool {
        self.contains(Hints::ALLOW_FAST_LOCK_ROUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_reflect_flags() {
        let hints = Hints::SINGLE_OPERATION | Hints::INTERMEDIATE_COMMITS;
        assert!(hints.is_single_operation());
        assert!(hints.has_intermediate_commits());
        assert!(!hints.is_follower_transaction());
    }

    #[test]
    fn default_is_empty() {
        assert!(Hints::default().is_empty());
    }
}

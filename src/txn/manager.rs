use crate::replica::timer::stop_signal;
use crate::storage::{Database, StorageEngine};
use crate::txn::error::TransactionError;
use crate::txn::gateway::{CoordinatorGateway, ReplicationHook};
use crate::txn::id::TransactionId;
use crate::txn::options::TransactionOptions;
use crate::txn::state::{AccessMode, Status, TransactionState};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedRwLockWriteGuard;
use tokio::time::Duration;

/// Transactions are spread across this many independently locked buckets,
/// so unrelated transactions never contend on a common mutex.
const NUM_BUCKETS: usize = 16;

/// How long a finalized transaction's tombstone outlives it, keeping
/// repeated commit/abort calls answerable.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(600);

const STATUS_CHANGE_POLL: Duration = Duration::from_millis(10);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ManagedTrxType {
    Managed,
    StandaloneAql,
    Tombstone,
}

impl fmt::Display for ManagedTrxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagedTrxType::Managed => write!(f, "managed"),
            ManagedTrxType::StandaloneAql => write!(f, "aql"),
            ManagedTrxType::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Per-transaction bookkeeping owned by the manager. Once an entry turns
/// into a tombstone its state pointer is dropped and `final_status` never
/// changes again; that is what makes repeated commit/abort idempotent.
struct ManagedTrx {
    trx_type: ManagedTrxType,
    final_status: Status,
    expiry: Instant,
    expires_at: DateTime<Utc>,
    ttl: Duration,
    lock_timeout: Duration,
    side_users: u32,
    exclusive_user: bool,
    user: String,
    database: String,
    state: Option<Arc<RwLock<TransactionState>>>,
}

impl ManagedTrx {
    fn is_tombstone(&self) -> bool {
        self.trx_type == ManagedTrxType::Tombstone
    }

    fn touch(&mut self) {
        self.expiry = Instant::now() + self.ttl;
        self.expires_at =
            Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
    }
}

struct Bucket {
    entries: RwLock<HashMap<TransactionId, ManagedTrx>>,
}

/// A leased transaction, checked out from the manager for the duration of
/// one operation. Return it with `return_managed_trx`.
pub struct TransactionLease {
    tid: TransactionId,
    mode: AccessMode,
    side_user: bool,
    state: Arc<RwLock<TransactionState>>,
}

impl TransactionLease {
    pub fn id(&self) -> TransactionId {
        self.tid
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_side_user(&self) -> bool {
        self.side_user
    }

    pub fn state(&self) -> &Arc<RwLock<TransactionState>> {
        &self.state
    }
}

pub struct TransactionManagerConfig {
    pub logger: slog::Logger,
    /// This server's id, encoded into every allocated transaction id.
    pub node_id: u16,
    pub engine: Arc<dyn StorageEngine>,
    /// When set, write-transaction commits are proposed to the replicated
    /// log and only finalize once committed there.
    pub replication: Option<Arc<dyn ReplicationHook>>,
    /// When set, fan-out aborts are dispatched to peer coordinators.
    pub coordinators: Option<Arc<dyn CoordinatorGateway>>,
    pub tombstone_ttl: Duration,
    /// How long a commit waits for a hot-backup hold to clear.
    pub commit_lock_timeout: Duration,
}

impl TransactionManagerConfig {
    pub fn new(logger: slog::Logger, node_id: u16, engine: Arc<dyn StorageEngine>) -> Self {
        TransactionManagerConfig {
            logger,
            node_id,
            engine,
            replication: None,
            coordinators: None,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            commit_lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Single authority per server for the existence, lifetime, and final
/// disposition of managed transactions. Owned by the server's feature graph
/// and passed by `Arc` to every call site; there is no process-wide global.
pub struct TransactionManager {
    logger: slog::Logger,
    engine: Arc<dyn StorageEngine>,
    replication: Option<Arc<dyn ReplicationHook>>,
    coordinators: Option<Arc<dyn CoordinatorGateway>>,
    node_id: u16,
    next_sequence: AtomicU64,
    inserts_disallowed: AtomicBool,
    buckets: Vec<Bucket>,
    // Hot-backup interlock: commits take this in read mode, a backup hold
    // takes it in write mode. Reads and leases are unaffected.
    commit_lock: Arc<tokio::sync::RwLock<()>>,
    hold_guard: Mutex<Option<OwnedRwLockWriteGuard<()>>>,
    tombstone_ttl: Duration,
    commit_lock_timeout: Duration,
}

impl TransactionManager {
    pub fn new(config: TransactionManagerConfig) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|_| Bucket {
                entries: RwLock::new(HashMap::new()),
            })
            .collect();

        TransactionManager {
            logger: config.logger,
            engine: config.engine,
            replication: config.replication,
            coordinators: config.coordinators,
            node_id: config.node_id,
            next_sequence: AtomicU64::new(0),
            inserts_disallowed: AtomicBool::new(false),
            buckets,
            commit_lock: Arc::new(tokio::sync::RwLock::new(())),
            hold_guard: Mutex::new(None),
            tombstone_ttl: config.tombstone_ttl,
            commit_lock_timeout: config.commit_lock_timeout,
        }
    }

    fn bucket(&self, tid: TransactionId) -> &Bucket {
        &self.buckets[(tid.as_u64() % NUM_BUCKETS as u64) as usize]
    }

    fn next_transaction_id(&self) -> TransactionId {
        TransactionId::from_parts(self.node_id, self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Refuse all new transactions from now on (shutdown / read-only mode).
    pub fn disallow_inserts(&self) {
        self.inserts_disallowed.store(true, Ordering::SeqCst);
    }

    /// Create a fresh externally managed transaction, returning its id.
    pub fn create_managed_trx(
        &self,
        database: &Database,
        user: &str,
        options: TransactionOptions,
        allow_dirty_reads: bool,
    ) -> Result<TransactionId, TransactionError> {
        if self.inserts_disallowed.load(Ordering::SeqCst) {
            return Err(TransactionError::Disallowed);
        }
        Self::validate_options(database, &options, allow_dirty_reads)?;

        let tid = self.next_transaction_id();
        self.install(database, user, tid, options)?;
        slog::debug!(self.logger, "Created managed transaction {}", tid);
        Ok(tid)
    }

    /// Idempotent create with a caller-supplied id, used when a follower
    /// replicates a leader's transaction. Succeeds without a duplicate if
    /// the id already names a matching live transaction.
    pub fn ensure_managed_trx(
        &self,
        database: &Database,
        user: &str,
        tid: TransactionId,
        mut options: TransactionOptions,
        is_follower_transaction: bool,
    ) -> Result<(), TransactionError> {
        if self.inserts_disallowed.load(Ordering::SeqCst) {
            return Err(TransactionError::Disallowed);
        }
        if let Some(result) = self.check_existing(database, tid) {
            return result;
        }
        Self::validate_options(database, &options, false)?;
        if is_follower_transaction {
            options.hints |= crate::txn::Hints::IS_FOLLOWER_TRX;
        }
        match self.install(database, user, tid, options) {
            Ok(()) => Ok(()),
            // Lost a race against a concurrent ensure for the same id.
            Err(TransactionError::Conflict(_)) => self
                .check_existing(database, tid)
                .unwrap_or(Err(TransactionError::Conflict("transaction id already in use".into()))),
            Err(e) => Err(e),
        }
    }

    fn check_existing(&self, database: &Database, tid: TransactionId) -> Option<Result<(), TransactionError>> {
        let entries = self.bucket(tid).entries.read();
        let entry = entries.get(&tid)?;
        if entry.is_tombstone() {
            return Some(Err(TransactionError::AlreadyFinalized {
                status: entry.final_status,
            }));
        }
        if entry.database != database.name() {
            return Some(Err(TransactionError::Conflict(
                "transaction id is bound to another database".into(),
            )));
        }
        Some(Ok(()))
    }

    fn validate_options(
        database: &Database,
        options: &TransactionOptions,
        allow_dirty_reads: bool,
    ) -> Result<(), TransactionError> {
        if options.hints.is_single_operation() && options.declared_collection_count() != 1 {
            return Err(TransactionError::Conflict(
                "single-operation transaction must declare exactly one collection".into(),
            ));
        }
        if allow_dirty_reads
            && (!options.write_collections.is_empty() || !options.exclusive_collections.is_empty())
        {
            return Err(TransactionError::Conflict(
                "dirty reads are only available for read-only transactions".into(),
            ));
        }
        for name in options
            .read_collections
            .iter()
            .chain(&options.write_collections)
            .chain(&options.exclusive_collections)
        {
            if !database.has_collection(name) {
                return Err(TransactionError::CollectionNotFound(name.clone()));
            }
        }
        Ok(())
    }

    fn install(
        &self,
        database: &Database,
        user: &str,
        tid: TransactionId,
        options: TransactionOptions,
    ) -> Result<(), TransactionError> {
        let state = self.engine.create_transaction_state(database, tid, &options)?;
        let trx_type = if options.hints.is_aql_standalone() {
            ManagedTrxType::StandaloneAql
        } else {
            ManagedTrxType::Managed
        };
        let mut entry = ManagedTrx {
            trx_type,
            final_status: Status::Running,
            expiry: Instant::now(),
            expires_at: Utc::now(),
            ttl: options.ttl,
            lock_timeout: options.lock_timeout,
            side_users: 0,
            exclusive_user: false,
            user: user.to_string(),
            database: database.name().to_string(),
            state: Some(Arc::new(RwLock::new(state))),
        };
        entry.touch();

        let mut entries = self.bucket(tid).entries.write();
        if entries.contains_key(&tid) {
            return Err(TransactionError::Conflict("transaction id already in use".into()));
        }
        entries.insert(tid, entry);
        Ok(())
    }

    /// Check out a transaction for one operation. Never blocks: the caller
    /// gets a lease or a definitive failure. Side users are concurrent
    /// readers; they do not exclude each other, only finalization.
    pub fn lease_managed_trx(
        &self,
        tid: TransactionId,
        mode: AccessMode,
        is_side_user: bool,
    ) -> Result<TransactionLease, TransactionError> {
        let mut entries = self.bucket(tid).entries.write();
        let entry = entries.get_mut(&tid).ok_or(TransactionError::NotFound)?;
        if entry.is_tombstone() {
            return Err(TransactionError::AlreadyFinalized {
                status: entry.final_status,
            });
        }
        let state = entry.state.clone().ok_or(TransactionError::Busy)?;

        let max_mode = state.read().max_access_mode();
        if mode > max_mode {
            return Err(TransactionError::Conflict(format!(
                "requested {:?} access on a transaction locked for {:?}",
                mode, max_mode
            )));
        }

        if is_side_user {
            entry.side_users += 1;
        } else {
            if entry.exclusive_user {
                return Err(TransactionError::Busy);
            }
            entry.exclusive_user = true;
        }
        entry.touch();

        Ok(TransactionLease {
            tid,
            mode,
            side_user: is_side_user,
            state,
        })
    }

    /// Hand a leased transaction back. Never destroys the entry; that is
    /// garbage collection's job.
    pub fn return_managed_trx(&self, tid: TransactionId, is_side_user: bool) -> Result<(), TransactionError> {
        let mut entries = self.bucket(tid).entries.write();
        let entry = entries.get_mut(&tid).ok_or(TransactionError::NotFound)?;
        if is_side_user {
            entry.side_users = entry.side_users.saturating_sub(1);
        } else {
            entry.exclusive_user = false;
        }
        entry.touch();
        Ok(())
    }

    pub async fn commit_managed_trx(&self, tid: TransactionId, database: &str) -> Result<Status, TransactionError> {
        self.update_transaction(tid, Status::Committed, database).await
    }

    pub async fn abort_managed_trx(&self, tid: TransactionId, database: &str) -> Result<Status, TransactionError> {
        self.update_transaction(tid, Status::Aborted, database).await
    }

    /// Drive a transaction to its terminal status. Waits (bounded) for side
    /// users to detach, performs the actual commit/abort, then tombstones
    /// the entry so repeated calls observe the identical outcome.
    async fn update_transaction(
        &self,
        tid: TransactionId,
        target: Status,
        database: &str,
    ) -> Result<Status, TransactionError> {
        let _commit_permit = if target == Status::Committed {
            match tokio::time::timeout(self.commit_lock_timeout, self.commit_lock.read()).await {
                Ok(guard) => Some(guard),
                Err(_) => return Err(TransactionError::LockTimeout),
            }
        } else {
            None
        };

        // Reserve the transaction: no side users, no other exclusive user.
        let started = Instant::now();
        let mut wait_budget: Option<Duration> = None;
        let state = loop {
            let mut reserved = None;
            {
                let mut entries = self.bucket(tid).entries.write();
                match entries.get_mut(&tid) {
                    None => return Err(TransactionError::NotFound),
                    Some(entry) => {
                        if entry.database != database {
                            return Err(TransactionError::NotFound);
                        }
                        if entry.is_tombstone() {
                            return if entry.final_status == target {
                                Ok(target)
                            } else {
                                Err(TransactionError::AlreadyFinalized {
                                    status: entry.final_status,
                                })
                            };
                        }
                        if wait_budget.is_none() {
                            wait_budget = Some(entry.lock_timeout);
                        }
                        if entry.side_users == 0 && !entry.exclusive_user {
                            if let Some(state) = entry.state.clone() {
                                entry.exclusive_user = true;
                                reserved = Some(state);
                            }
                        }
                    }
                }
            }
            if let Some(state) = reserved {
                break state;
            }
            if started.elapsed() >= wait_budget.unwrap_or(STATUS_CHANGE_POLL) {
                return Err(TransactionError::LockTimeout);
            }
            tokio::time::sleep(STATUS_CHANGE_POLL).await;
        };

        let result = self.finalize(tid, &state, target).await;

        let mut entries = self.bucket(tid).entries.write();
        if let Some(entry) = entries.get_mut(&tid) {
            entry.exclusive_user = false;
            if result.is_ok() {
                entry.trx_type = ManagedTrxType::Tombstone;
                entry.final_status = target;
                entry.state = None;
                entry.ttl = self.tombstone_ttl;
                entry.touch();
                slog::debug!(self.logger, "Transaction {} finalized as {}", tid, target);
            }
        }

        result.map(|_| target)
    }

    async fn finalize(
        &self,
        tid: TransactionId,
        state: &Arc<RwLock<TransactionState>>,
        target: Status,
    ) -> Result<(), TransactionError> {
        if target == Status::Committed {
            let record = {
                let guard = state.read();
                if guard.status() != Status::Running {
                    return Err(TransactionError::Conflict(format!(
                        "transaction is {}",
                        guard.status()
                    )));
                }
                guard.commit_record()
            };
            if !record.writes.is_empty() {
                if let Some(replication) = &self.replication {
                    let payload = serde_json::to_vec(&record)
                        .map_err(|e| TransactionError::Replication(e.to_string()))?;
                    replication
                        .replicate_commit(tid, Bytes::from(payload))
                        .await
                        .map_err(|e| TransactionError::Replication(e.to_string()))?;
                }
            }
            let mut guard = state.write();
            self.engine.commit(&mut guard)?;
            guard.mark_committed()?;
        } else {
            let mut guard = state.write();
            self.engine.abort(&mut guard)?;
            guard.mark_aborted()?;
        }
        Ok(())
    }

    /// Best-effort cleanup pass: drop tombstones past their TTL and abort
    /// running transactions past theirs. With `abort_all`, every live
    /// transaction is aborted regardless of TTL (shutdown, failover).
    /// Returns whether anything was reaped or aborted.
    pub async fn garbage_collect(&self, abort_all: bool) -> bool {
        let now = Instant::now();
        let mut worked = false;
        let mut to_abort = Vec::new();

        for bucket in &self.buckets {
            let mut entries = bucket.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !(entry.is_tombstone() && entry.side_users == 0 && entry.expiry <= now));
            worked |= entries.len() != before;

            for (tid, entry) in entries.iter() {
                if !entry.is_tombstone() && (abort_all || entry.expiry <= now) {
                    to_abort.push((*tid, entry.database.clone()));
                }
            }
        }

        for (tid, database) in to_abort {
            match self.update_transaction(tid, Status::Aborted, &database).await {
                Ok(_) => {
                    worked = true;
                    slog::info!(self.logger, "Garbage collection aborted transaction {}", tid);
                }
                Err(TransactionError::NotFound) | Err(TransactionError::AlreadyFinalized { .. }) => {}
                Err(e) => {
                    slog::debug!(self.logger, "Garbage collection skipped {}: {}", tid, e);
                }
            }
        }

        worked
    }

    /// Abort every write transaction owned by `user` on this server, and —
    /// with `fanout` — on every peer coordinator as well.
    pub async fn abort_all_managed_write_trx(&self, user: &str, fanout: bool) -> Result<(), TransactionError> {
        let mut to_abort = Vec::new();
        for bucket in &self.buckets {
            let entries = bucket.entries.read();
            for (tid, entry) in entries.iter() {
                if entry.is_tombstone() || entry.user != user {
                    continue;
                }
                let is_write = entry
                    .state
                    .as_ref()
                    .map(|s| s.read().max_access_mode() >= AccessMode::Write)
                    .unwrap_or(false);
                if is_write {
                    to_abort.push((*tid, entry.database.clone()));
                }
            }
        }

        for (tid, database) in to_abort {
            match self.update_transaction(tid, Status::Aborted, &database).await {
                Ok(_) | Err(TransactionError::AlreadyFinalized { .. }) | Err(TransactionError::NotFound) => {}
                Err(e) => {
                    slog::warn!(self.logger, "Failed to abort transaction {} for {}: {}", tid, user, e)
                }
            }
        }

        if fanout {
            if let Some(coordinators) = &self.coordinators {
                coordinators.abort_all_write_transactions(user).await?;
            }
        }
        Ok(())
    }

    /// Block all transaction commits for a hot-backup snapshot. Reads and
    /// leases continue. Returns false if the interlock cannot be acquired
    /// within `timeout`; redundant calls while held are no-ops.
    pub async fn hold_transactions(&self, timeout: Duration) -> bool {
        if self.hold_guard.lock().is_some() {
            return true;
        }
        match tokio::time::timeout(timeout, self.commit_lock.clone().write_owned()).await {
            Ok(guard) => {
                *self.hold_guard.lock() = Some(guard);
                slog::info!(self.logger, "Commits are on hold for hot backup");
                true
            }
            Err(_) => false,
        }
    }

    pub fn release_transactions(&self) {
        if self.hold_guard.lock().take().is_some() {
            slog::info!(self.logger, "Commit hold released");
        }
    }

    /// Introspection document for ops tooling: every known transaction,
    /// optionally filtered by database.
    pub fn to_json(&self, database: Option<&str>) -> serde_json::Value {
        let mut transactions = Vec::new();
        for bucket in &self.buckets {
            let entries = bucket.entries.read();
            for (tid, entry) in entries.iter() {
                if let Some(filter) = database {
                    if entry.database != filter {
                        continue;
                    }
                }
                let status = if entry.is_tombstone() {
                    entry.final_status
                } else {
                    entry
                        .state
                        .as_ref()
                        .map(|s| s.read().status())
                        .unwrap_or(Status::Running)
                };
                transactions.push(serde_json::json!({
                    "id": tid.to_string(),
                    "database": entry.database,
                    "user": entry.user,
                    "type": entry.trx_type.to_string(),
                    "state": status.to_string(),
                    "sideUsers": entry.side_users,
                    "expires": entry.expires_at.to_rfc3339(),
                }));
            }
        }
        serde_json::Value::Array(transactions)
    }
}

/// Handle to the background garbage-collection task; dropping it stops the
/// task.
pub struct GcHandle {
    _stopper: stop_signal::Stopper,
}

/// Run `garbage_collect` periodically with a jittered interval, so multiple
/// servers do not sweep in lockstep.
pub fn spawn_gc_loop(manager: Arc<TransactionManager>, interval: Duration) -> GcHandle {
    let (stopper, stop_check) = stop_signal::new();

    tokio::task::spawn(async move {
        loop {
            let jitter_cap = (interval.as_millis() as u64 / 4).max(1);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap));
            tokio::time::sleep(interval + jitter).await;
            if stop_check.should_stop() {
                break;
            }
            manager.garbage_collect(false).await;
        }
    });

    GcHandle { _stopper: stopper }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;
    use crate::txn::Hints;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn setup() -> (Arc<TransactionManager>, Arc<MemoryEngine>, Arc<Database>) {
        setup_with(|config| config)
    }

    fn setup_with<F>(tweak: F) -> (Arc<TransactionManager>, Arc<MemoryEngine>, Arc<Database>)
    where
        F: FnOnce(TransactionManagerConfig) -> TransactionManagerConfig,
    {
        let engine = MemoryEngine::new();
        let database = Database::new("shop");
        database.create_collection("products");
        database.create_collection("orders");

        let config = TransactionManagerConfig::new(test_logger(), 1, engine.clone() as Arc<dyn StorageEngine>);
        let manager = Arc::new(TransactionManager::new(tweak(config)));
        (manager, engine, database)
    }

    fn write_options(collections: &[&str]) -> TransactionOptions {
        TransactionOptions::for_writes(collections.iter().map(|c| c.to_string()).collect())
    }

    #[tokio::test]
    async fn commit_is_idempotent_and_tombstones() {
        let (manager, engine, database) = setup();
        let tid = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();

        let lease = manager.lease_managed_trx(tid, AccessMode::Write, false).unwrap();
        lease.state().write().note_write("products", 64).unwrap();
        manager.return_managed_trx(tid, false).unwrap();

        assert_eq!(manager.commit_managed_trx(tid, "shop").await.unwrap(), Status::Committed);
        assert_eq!(engine.committed_writes("products"), 1);

        // Second commit returns the recorded status, with no side effects.
        assert_eq!(manager.commit_managed_trx(tid, "shop").await.unwrap(), Status::Committed);
        assert_eq!(engine.committed_writes("products"), 1);

        // Abort of a committed transaction is a detectable conflict.
        match manager.abort_managed_trx(tid, "shop").await {
            Err(TransactionError::AlreadyFinalized { status }) => assert_eq!(status, Status::Committed),
            other => panic!("unexpected: {:?}", other),
        }

        // Leasing a finalized transaction reports the tombstone, not a
        // missing transaction.
        match manager.lease_managed_trx(tid, AccessMode::Read, true) {
            Err(TransactionError::AlreadyFinalized { status }) => assert_eq!(status, Status::Committed),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let (manager, _, _) = setup();
        let bogus = TransactionId::from_parts(9, 999);
        assert!(matches!(
            manager.commit_managed_trx(bogus, "shop").await,
            Err(TransactionError::NotFound)
        ));
        assert!(matches!(
            manager.lease_managed_trx(bogus, AccessMode::Read, true),
            Err(TransactionError::NotFound)
        ));
    }

    #[test]
    fn create_validates_collections_and_hints() {
        let (manager, _, database) = setup();

        match manager.create_managed_trx(&database, "alice", write_options(&["nonexistent"]), false) {
            Err(TransactionError::CollectionNotFound(name)) => assert_eq!(name, "nonexistent"),
            other => panic!("unexpected: {:?}", other.err()),
        }

        let mut options = write_options(&["products", "orders"]);
        options.hints = Hints::SINGLE_OPERATION;
        assert!(matches!(
            manager.create_managed_trx(&database, "alice", options, false),
            Err(TransactionError::Conflict(_))
        ));

        assert!(matches!(
            manager.create_managed_trx(&database, "alice", write_options(&["products"]), true),
            Err(TransactionError::Conflict(_))
        ));
    }

    #[test]
    fn disallow_inserts_blocks_creation() {
        let (manager, _, database) = setup();
        manager.disallow_inserts();
        assert!(matches!(
            manager.create_managed_trx(&database, "alice", write_options(&["products"]), false),
            Err(TransactionError::Disallowed)
        ));
    }

    #[tokio::test]
    async fn ensure_managed_trx_is_idempotent() {
        let (manager, _, database) = setup();
        let tid = TransactionId::from_parts(7, 42); // follower-supplied id

        manager
            .ensure_managed_trx(&database, "alice", tid, write_options(&["products"]), true)
            .unwrap();
        manager
            .ensure_managed_trx(&database, "alice", tid, write_options(&["products"]), true)
            .unwrap();

        let lease = manager.lease_managed_trx(tid, AccessMode::Write, false).unwrap();
        assert!(lease.state().read().hints().is_follower_transaction());
        manager.return_managed_trx(tid, false).unwrap();

        manager.commit_managed_trx(tid, "shop").await.unwrap();
        match manager.ensure_managed_trx(&database, "alice", tid, write_options(&["products"]), true) {
            Err(TransactionError::AlreadyFinalized { status }) => assert_eq!(status, Status::Committed),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn commit_waits_for_side_users() {
        let (manager, _, database) = setup();
        let tid = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();

        let _side = manager.lease_managed_trx(tid, AccessMode::Read, true).unwrap();

        let committer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.commit_managed_trx(tid, "shop").await })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!committer.is_finished(), "commit must block while a side user is attached");

        manager.return_managed_trx(tid, true).unwrap();
        let outcome = committer.await.unwrap();
        assert_eq!(outcome.unwrap(), Status::Committed);
    }

    #[tokio::test]
    async fn write_lease_is_exclusive_but_side_users_are_not() {
        let (manager, _, database) = setup();
        let tid = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();

        let _main = manager.lease_managed_trx(tid, AccessMode::Write, false).unwrap();
        assert!(matches!(
            manager.lease_managed_trx(tid, AccessMode::Write, false),
            Err(TransactionError::Busy)
        ));

        // Side users stack freely alongside the main user.
        let _side_a = manager.lease_managed_trx(tid, AccessMode::Read, true).unwrap();
        let _side_b = manager.lease_managed_trx(tid, AccessMode::Read, true).unwrap();

        manager.return_managed_trx(tid, false).unwrap();
        let _main_again = manager.lease_managed_trx(tid, AccessMode::Write, false).unwrap();
    }

    #[tokio::test]
    async fn read_only_transaction_refuses_write_lease() {
        let (manager, _, database) = setup();
        let options = TransactionOptions {
            read_collections: vec!["products".to_string()],
            ..TransactionOptions::default()
        };
        let tid = manager.create_managed_trx(&database, "alice", options, false).unwrap();

        assert!(matches!(
            manager.lease_managed_trx(tid, AccessMode::Write, false),
            Err(TransactionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn hold_transactions_blocks_commits_until_release() {
        let (manager, _, database) = setup();
        let tid = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();

        assert!(manager.hold_transactions(Duration::from_secs(1)).await);
        // Redundant hold is a no-op.
        assert!(manager.hold_transactions(Duration::from_secs(1)).await);

        let committer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.commit_managed_trx(tid, "shop").await })
        };
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!committer.is_finished(), "commit must wait for the hold to clear");

        // Aborts are not commits; they proceed under a hold.
        let other = manager
            .create_managed_trx(&database, "alice", write_options(&["orders"]), false)
            .unwrap();
        manager.abort_managed_trx(other, "shop").await.unwrap();

        manager.release_transactions();
        assert_eq!(committer.await.unwrap().unwrap(), Status::Committed);
    }

    #[tokio::test]
    async fn garbage_collection_reaps_expired_transactions_and_tombstones() {
        let (manager, _, database) = setup_with(|mut config| {
            config.tombstone_ttl = Duration::from_millis(20);
            config
        });

        let mut options = write_options(&["products"]);
        options.ttl = Duration::from_millis(20);
        let tid = manager.create_managed_trx(&database, "alice", options, false).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.garbage_collect(false).await);

        // The expired transaction was force-aborted and tombstoned.
        match manager.commit_managed_trx(tid, "shop").await {
            Err(TransactionError::AlreadyFinalized { status }) => assert_eq!(status, Status::Aborted),
            other => panic!("unexpected: {:?}", other),
        }

        // Once the tombstone itself expires, the id is gone entirely.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.garbage_collect(false).await);
        assert!(matches!(
            manager.commit_managed_trx(tid, "shop").await,
            Err(TransactionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn abort_all_reaps_everything_without_waiting_for_ttl() {
        let (manager, _, database) = setup();
        let a = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();
        let b = manager
            .create_managed_trx(&database, "bob", write_options(&["orders"]), false)
            .unwrap();

        assert!(manager.garbage_collect(true).await);
        for tid in [a, b] {
            match manager.abort_managed_trx(tid, "shop").await {
                Ok(Status::Aborted) => {}
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    struct RecordingGateway {
        aborted_users: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CoordinatorGateway for RecordingGateway {
        async fn abort_all_write_transactions(&self, user: &str) -> Result<(), TransactionError> {
            self.aborted_users.lock().push(user.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn abort_all_write_trx_targets_one_user_and_fans_out() {
        let gateway = Arc::new(RecordingGateway {
            aborted_users: Mutex::new(Vec::new()),
        });
        let (manager, _, database) = setup_with(|mut config| {
            config.coordinators = Some(gateway.clone());
            config
        });

        let alice_write = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();
        let alice_read = manager
            .create_managed_trx(
                &database,
                "alice",
                TransactionOptions {
                    read_collections: vec!["products".to_string()],
                    ..TransactionOptions::default()
                },
                false,
            )
            .unwrap();
        let bob_write = manager
            .create_managed_trx(&database, "bob", write_options(&["orders"]), false)
            .unwrap();

        manager.abort_all_managed_write_trx("alice", true).await.unwrap();

        // Alice's write transaction is gone; her read transaction and Bob's
        // write transaction are untouched.
        assert!(matches!(
            manager.lease_managed_trx(alice_write, AccessMode::Read, true),
            Err(TransactionError::AlreadyFinalized { .. })
        ));
        assert!(manager.lease_managed_trx(alice_read, AccessMode::Read, true).is_ok());
        assert!(manager.lease_managed_trx(bob_write, AccessMode::Write, false).is_ok());

        assert_eq!(gateway.aborted_users.lock().as_slice(), &["alice".to_string()]);
    }

    #[tokio::test]
    async fn commits_in_different_buckets_run_concurrently() {
        let (manager, _, database) = setup();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let tid = manager
                .create_managed_trx(&database, "alice", write_options(&["products"]), false)
                .unwrap();
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.commit_managed_trx(tid, "shop").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Status::Committed);
        }
    }

    #[test]
    fn to_json_lists_transactions() {
        let (manager, _, database) = setup();
        let tid = manager
            .create_managed_trx(&database, "alice", write_options(&["products"]), false)
            .unwrap();

        let listing = manager.to_json(Some("shop"));
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry["id"], tid.to_string());
        assert_eq!(entry["state"], "running");
        assert_eq!(entry["type"], "managed");
        assert_eq!(entry["user"], "alice");
        assert!(entry["expires"].as_str().is_some());

        assert_eq!(manager.to_json(Some("other")).as_array().unwrap().len(), 0);
    }
}

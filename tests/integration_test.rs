use bytes::Bytes;
use polydb::{
    spawn_replicated_log, AccessMode, CommitRecord, Database, DocumentCounters, InMemoryLogStore, LocalNetwork,
    LogReplicationHook, LogTerm, MemoryEngine, ParticipantId, PeerTransport, ProposeError, ReplicatedLogConfig,
    ReplicatedLogHandle, ReplicationOptions, RoleSnapshot, Status, StorageEngine, TransactionError,
    TransactionManager, TransactionManagerConfig, TransactionOptions,
};
use slog::Drain;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

struct Node {
    id: ParticipantId,
    handle: ReplicatedLogHandle,
    counters: DocumentCounters,
}

fn create_root_logger(node_id: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Node" => node_id.to_string()))
}

fn spawn_cluster(network: &Arc<LocalNetwork>, size: usize) -> Result<Vec<Node>, Box<dyn Error>> {
    let mut nodes = Vec::with_capacity(size);
    for i in 0..size {
        let id = ParticipantId::new(format!("dbserver-{}", i + 1));
        let machine = polydb::DocumentStateMachine::new();
        let counters = machine.counters();

        let (handle, _stream) = spawn_replicated_log(
            ReplicatedLogConfig {
                logger: create_root_logger(id.as_str()),
                my_id: id.clone(),
                store: InMemoryLogStore::new(),
                state_machine: machine,
                options: ReplicationOptions {
                    heartbeat_interval: Some(Duration::from_millis(20)),
                    rpc_timeout: Some(Duration::from_millis(200)),
                    ..ReplicationOptions::default()
                },
            },
            network.clone() as Arc<dyn PeerTransport>,
        )?;
        network.register(id.clone(), handle.actor_client());

        nodes.push(Node {
            id,
            handle,
            counters,
        });
    }
    Ok(nodes)
}

fn participant_ids(nodes: &[Node]) -> Vec<ParticipantId> {
    nodes.iter().map(|n| n.id.clone()).collect()
}

async fn wait_until<F>(what: &str, timeout: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn managed_transaction_commit_replicates_to_all_participants() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let nodes = spawn_cluster(&network, 3)?;
    let group = participant_ids(&nodes);

    // Leadership is assigned externally: node 1 leads, the rest follow.
    nodes[0].handle.become_leader(LogTerm::new(1), group.clone()).await?;
    for node in &nodes[1..] {
        node.handle
            .become_follower(LogTerm::new(1), Some(nodes[0].id.clone()))
            .await?;
    }

    // Transaction manager on the leader, committing through the log.
    let engine = MemoryEngine::new();
    let database = Database::new("shop");
    database.create_collection("products");

    let mut config = TransactionManagerConfig::new(
        create_root_logger("txn-manager"),
        1,
        engine.clone() as Arc<dyn StorageEngine>,
    );
    config.replication = Some(Arc::new(LogReplicationHook::new(nodes[0].handle.clone())));
    let manager = Arc::new(TransactionManager::new(config));

    let tid = manager.create_managed_trx(
        &database,
        "alice",
        TransactionOptions::for_writes(vec!["products".to_string()]),
        false,
    )?;

    let lease = manager.lease_managed_trx(tid, AccessMode::Write, false)?;
    lease.state().write().note_write("products", 256)?;
    manager.return_managed_trx(tid, false)?;

    // Commit resolves only after the commit marker is replicated to a
    // quorum and applied locally.
    assert_eq!(manager.commit_managed_trx(tid, "shop").await?, Status::Committed);
    assert_eq!(engine.committed_writes("products"), 1);

    // Every participant's state machine converges on the committed write.
    wait_until("all replicas to apply the commit record", Duration::from_secs(5), || {
        nodes.iter().all(|n| n.counters.document_count("products") == 1)
    })
    .await;

    // Repeating the commit returns the recorded status with no new effects.
    assert_eq!(manager.commit_managed_trx(tid, "shop").await?, Status::Committed);
    assert_eq!(engine.committed_writes("products"), 1);
    wait_until("commit counts to stay at one", Duration::from_millis(200), || {
        nodes.iter().all(|n| n.counters.applied_commits() == 1)
    })
    .await;

    // A lease on the finalized id reports the tombstone, not a live trx.
    match manager.lease_managed_trx(tid, AccessMode::Read, true) {
        Err(TransactionError::AlreadyFinalized { status }) => assert_eq!(status, Status::Committed),
        other => panic!("expected tombstone, got: {:?}", other.err()),
    }

    Ok(())
}

#[tokio::test]
async fn leader_change_keeps_log_consistent_and_redirects_proposals() -> Result<(), Box<dyn Error>> {
    let network = LocalNetwork::new();
    let nodes = spawn_cluster(&network, 3)?;
    let group = participant_ids(&nodes);

    nodes[0].handle.become_leader(LogTerm::new(1), group.clone()).await?;
    for node in &nodes[1..] {
        node.handle
            .become_follower(LogTerm::new(1), Some(nodes[0].id.clone()))
            .await?;
    }

    let record = |seq: u64| {
        let mut writes = HashMap::new();
        writes.insert("products".to_string(), 1u64);
        let record = CommitRecord {
            tid: polydb::TransactionId::from_parts(1, seq),
            database: "shop".to_string(),
            writes,
        };
        Bytes::from(serde_json::to_vec(&record).unwrap())
    };

    // First entry through the original leader.
    let position = nodes[0].handle.propose(record(1)).await?;
    nodes[0].handle.wait_for_commit(position).await?;
    wait_until("all replicas to apply the first record", Duration::from_secs(5), || {
        nodes.iter().all(|n| n.counters.applied_commits() == 1)
    })
    .await;

    // Node 2 takes over for term 2; the old leader steps down.
    nodes[1].handle.become_leader(LogTerm::new(2), group.clone()).await?;
    nodes[0]
        .handle
        .become_follower(LogTerm::new(2), Some(nodes[1].id.clone()))
        .await?;
    nodes[2]
        .handle
        .become_follower(LogTerm::new(2), Some(nodes[1].id.clone()))
        .await?;

    // Proposals to the demoted node are redirected to the new leader.
    match nodes[0].handle.propose(record(2)).await {
        Err(ProposeError::NotLeader { leader }) => assert_eq!(leader, Some(nodes[1].id.clone())),
        other => panic!("expected redirect, got: {:?}", other),
    }

    // The new leader replicates across the same log without losing the
    // committed prefix.
    let position = nodes[1].handle.propose(record(2)).await?;
    nodes[1].handle.wait_for_commit(position).await?;
    wait_until("all replicas to apply the second record", Duration::from_secs(5), || {
        nodes.iter().all(|n| n.counters.applied_commits() == 2)
    })
    .await;

    for node in &nodes {
        let status = node.handle.status().await?;
        assert_eq!(status.term, LogTerm::new(2));
        assert!(status.commit_index >= position.index);
        if node.id == nodes[1].id {
            assert_eq!(status.role, RoleSnapshot::Leader);
        }
    }

    Ok(())
}

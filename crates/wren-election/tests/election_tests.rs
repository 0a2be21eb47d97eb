//! End-to-end election scenarios against the in-memory adapters.

use std::sync::Arc;

use tempfile::TempDir;
use wren_election::{
    ChannelClusterConfig, ConfigCommitter, ElectionConfig, ElectionCoordinator, ElectionError,
    InMemoryConfigCommitter, InMemoryReplicaTransport, StaticLiveness, WitnessStore,
};
use wren_msglog::{Message, MessageLogStore, MsgLogConfig};

/// Local witness source with a fixed answer for every channel.
struct FixedWitness(u64, u64);

impl WitnessStore for FixedWitness {
    fn last_index_and_term(&self, _: &str, _: u8) -> wren_msglog::Result<(u64, u64)> {
        Ok((self.0, self.1))
    }
}

fn cluster_config(replicas: Vec<u64>, term: u32, leader_id: u64) -> ChannelClusterConfig {
    ChannelClusterConfig {
        channel_id: "c1".to_string(),
        channel_type: 2,
        replicas,
        term,
        leader_id,
    }
}

fn coordinator(
    config: ElectionConfig,
    witness_store: Arc<dyn WitnessStore>,
    liveness: Arc<StaticLiveness>,
    transport: Arc<InMemoryReplicaTransport>,
) -> ElectionCoordinator {
    ElectionCoordinator::new(config, witness_store, liveness, transport).unwrap()
}

#[tokio::test]
async fn test_happy_election_tie_keeps_first_replica() {
    // Replicas 10/20 tie on (term 7, index 100); 30 trails. First in the
    // replica list wins the tie.
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(10, "c1", 2, 100, 7);
    transport.set_witness(20, "c1", 2, 100, 7);
    transport.set_witness(30, "c1", 2, 99, 7);
    let liveness = Arc::new(StaticLiveness::new([10, 20, 30]));

    let ec = coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    );
    ec.start();

    let elected = ec.elect(cluster_config(vec![10, 20, 30], 7, 20)).await.unwrap();
    assert_eq!(elected.term, 8);
    assert_eq!(elected.leader_id, 10);
    assert_eq!(elected.replicas, vec![10, 20, 30]);
    ec.stop().await;
}

#[tokio::test]
async fn test_higher_term_wins_over_longer_log() {
    // Replica 2 has the longest log but an older term; replica 3 has the
    // greatest index among the max-term replicas.
    let mut config = ElectionConfig::default();
    config.node_id = 1;
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(2, "c1", 2, 100, 2);
    transport.set_witness(3, "c1", 2, 50, 3);
    let liveness = Arc::new(StaticLiveness::new([1, 2, 3]));

    // Node 1 answers locally: (index 5, term 3).
    let ec = coordinator(config, Arc::new(FixedWitness(5, 3)), liveness, transport);
    ec.start();

    let elected = ec.elect(cluster_config(vec![1, 2, 3], 3, 1)).await.unwrap();
    assert_eq!(elected.leader_id, 3);
    assert_eq!(elected.term, 4);
    ec.stop().await;
}

#[tokio::test]
async fn test_sub_quorum_fails() {
    // maxReplicas = 5 → quorum 3, but only two replicas respond.
    let mut config = ElectionConfig::default();
    config.channel_max_replica_count = 5;
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(10, "c1", 2, 10, 1);
    transport.set_witness(20, "c1", 2, 10, 1);
    let liveness = Arc::new(StaticLiveness::new([10, 20]));

    let ec = coordinator(config, Arc::new(FixedWitness(0, 0)), liveness, transport);
    ec.start();

    let err = ec
        .elect(cluster_config(vec![10, 20, 30, 40, 50], 1, 0))
        .await
        .unwrap_err();
    assert_eq!(err, ElectionError::NotEnoughReplicas { have: 2, quorum: 3 });
    ec.stop().await;
}

#[tokio::test]
async fn test_offline_majority_fails() {
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(10, "c1", 2, 10, 1);
    transport.set_witness(20, "c1", 2, 10, 1);
    transport.set_witness(30, "c1", 2, 10, 1);
    let liveness = Arc::new(StaticLiveness::new([10]));
    liveness.set_online(20, false);
    liveness.set_online(30, false);

    let ec = coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    );
    ec.start();

    let err = ec
        .elect(cluster_config(vec![10, 20, 30], 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ElectionError::NotEnoughReplicas { have: 1, quorum: 2 }));
    ec.stop().await;
}

#[tokio::test]
async fn test_rpc_failure_is_absorbed_when_quorum_holds() {
    // Replica 3 is online but its RPC fails (unknown peer); 10 and 20 still
    // form a quorum.
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(10, "c1", 2, 42, 5);
    transport.set_witness(20, "c1", 2, 40, 5);
    let liveness = Arc::new(StaticLiveness::new([10, 20, 30]));

    let ec = coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    );
    ec.start();

    let elected = ec
        .elect(cluster_config(vec![10, 20, 30], 5, 20))
        .await
        .unwrap();
    assert_eq!(elected.leader_id, 10);
    assert_eq!(elected.term, 6);
    ec.stop().await;
}

#[tokio::test]
async fn test_all_empty_logs_yield_no_leader() {
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.add_peer(10);
    transport.add_peer(20);
    transport.add_peer(30);
    let liveness = Arc::new(StaticLiveness::new([10, 20, 30]));

    let ec = coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    );
    ec.start();

    let err = ec
        .elect(cluster_config(vec![10, 20, 30], 0, 0))
        .await
        .unwrap_err();
    assert_eq!(err, ElectionError::NoLeader);
    ec.stop().await;
}

#[tokio::test]
async fn test_enqueue_fails_fast_when_queue_full() {
    let mut config = ElectionConfig::default();
    config.queue_cap = 1;
    let transport = Arc::new(InMemoryReplicaTransport::new());
    let liveness = Arc::new(StaticLiveness::new([10]));

    // Not started: nothing drains the queue.
    let ec = coordinator(config, Arc::new(FixedWitness(0, 0)), liveness, transport);

    let _rx = ec.request_election(cluster_config(vec![10], 1, 0)).unwrap();
    let err = ec
        .request_election(cluster_config(vec![10], 1, 0))
        .unwrap_err();
    assert_eq!(err, ElectionError::QueueFull);
}

#[tokio::test]
async fn test_stopped_coordinator_rejects_requests() {
    let transport = Arc::new(InMemoryReplicaTransport::new());
    let liveness = Arc::new(StaticLiveness::new([10]));
    let ec = coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    );
    ec.start();
    ec.stop().await;

    let err = ec
        .request_election(cluster_config(vec![10], 1, 0))
        .unwrap_err();
    assert_eq!(err, ElectionError::Stopped);
}

#[tokio::test]
async fn test_batched_requests_resolve_independently() {
    let transport = Arc::new(InMemoryReplicaTransport::new());
    for channel in ["a", "b", "c"] {
        transport.set_witness(10, channel, 1, 10, 2);
        transport.set_witness(20, channel, 1, 20, 2);
    }
    let liveness = Arc::new(StaticLiveness::new([10, 20]));

    let ec = Arc::new(coordinator(
        ElectionConfig::default(),
        Arc::new(FixedWitness(0, 0)),
        liveness,
        transport,
    ));
    ec.start();

    let mut rxs = Vec::new();
    for channel in ["a", "b", "c"] {
        let config = ChannelClusterConfig {
            channel_id: channel.to_string(),
            channel_type: 1,
            replicas: vec![10, 20],
            term: 2,
            leader_id: 0,
        };
        rxs.push((channel, ec.request_election(config).unwrap()));
    }

    for (channel, mut rx) in rxs {
        let elected = rx.recv().await.unwrap().unwrap();
        assert_eq!(elected.channel_id, channel);
        assert_eq!(elected.leader_id, 20);
        assert_eq!(elected.term, 3);
    }
    ec.stop().await;
}

#[tokio::test]
async fn test_election_against_real_message_log() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        MessageLogStore::open(MsgLogConfig {
            data_dir: dir.path().to_path_buf(),
            shard_count: 2,
            fsync: false,
            ..Default::default()
        })
        .unwrap(),
    );

    // The local log for c1/2 ends at (index 3, term 9).
    let msgs: Vec<Message> = (1..=3)
        .map(|seq| Message {
            message_id: seq as i64,
            message_seq: seq,
            term: 9,
            ..Default::default()
        })
        .collect();
    store.append_messages("c1", 2, &msgs).unwrap();

    let mut config = ElectionConfig::default();
    config.node_id = 1;
    let transport = Arc::new(InMemoryReplicaTransport::new());
    transport.set_witness(2, "c1", 2, 50, 8);
    let liveness = Arc::new(StaticLiveness::new([1, 2]));

    let ec = ElectionCoordinator::new(config, store, liveness, transport).unwrap();
    ec.start();

    let elected = ec.elect(cluster_config(vec![1, 2], 9, 2)).await.unwrap();
    // The local replica's term 9 beats the peer's longer term-8 log.
    assert_eq!(elected.leader_id, 1);
    assert_eq!(elected.term, 10);

    let committer = InMemoryConfigCommitter::new();
    committer.commit(elected.clone()).await.unwrap();
    assert_eq!(committer.committed(), vec![elected]);
    ec.stop().await;
}

//! Witness collection for one election round.
//!
//! Given a micro-batch of election requests, the collector groups them by
//! replica, answers for the local replica straight from the message log
//! store, and issues ONE batched RPC per remote online replica carrying all
//! channels that replica covers. The fan-out shares a single deadline; a
//! replica whose RPC fails or times out contributes zero witnesses and the
//! election proceeds if the others form a quorum. A local store failure
//! aborts the round: the local node is authoritative for its own log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;
use wren_msglog::MessageLogStore;

use crate::error::{ElectionError, Result};
use crate::transport::{NodeLiveness, ReplicaTransport};
use crate::types::{ChannelLastLogInfoReq, ChannelLastLogInfoResp, ElectionRequest};

/// Witness source for the local replica. Implemented by the message log
/// store; mockable for coordinator tests.
pub trait WitnessStore: Send + Sync {
    fn last_index_and_term(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> wren_msglog::Result<(u64, u64)>;
}

impl WitnessStore for MessageLogStore {
    fn last_index_and_term(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> wren_msglog::Result<(u64, u64)> {
        MessageLogStore::last_index_and_term(self, channel_id, channel_type)
    }
}

pub struct WitnessCollector {
    node_id: u64,
    timeout: Duration,
    witness_store: Arc<dyn WitnessStore>,
    liveness: Arc<dyn NodeLiveness>,
    transport: Arc<dyn ReplicaTransport>,
}

impl WitnessCollector {
    pub fn new(
        node_id: u64,
        timeout: Duration,
        witness_store: Arc<dyn WitnessStore>,
        liveness: Arc<dyn NodeLiveness>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        Self {
            node_id,
            timeout,
            witness_store,
            liveness,
            transport,
        }
    }

    /// Collect witnesses for a batch of requests, keyed by replica id.
    ///
    /// Returns every witness that was gathered before the deadline. Does not
    /// retry within a round.
    pub async fn collect(
        &self,
        reqs: &[ElectionRequest],
    ) -> Result<HashMap<u64, Vec<ChannelLastLogInfoResp>>> {
        let mut by_replica: HashMap<u64, Vec<&ElectionRequest>> = HashMap::new();
        for req in reqs {
            for &replica_id in &req.config.replicas {
                by_replica.entry(replica_id).or_default().push(req);
            }
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let witnesses: Arc<Mutex<HashMap<u64, Vec<ChannelLastLogInfoResp>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut rpc_futures = Vec::new();

        for (replica_id, replica_reqs) in by_replica {
            if !self.liveness.is_online(replica_id) {
                continue;
            }

            if replica_id == self.node_id {
                let mut local = Vec::with_capacity(replica_reqs.len());
                for req in &replica_reqs {
                    let (log_index, term) = self
                        .witness_store
                        .last_index_and_term(&req.channel.channel_id, req.channel.channel_type)
                        .map_err(|e| ElectionError::WitnessCollection(e.to_string()))?;
                    local.push(ChannelLastLogInfoResp {
                        channel_id: req.channel.channel_id.clone(),
                        channel_type: req.channel.channel_type,
                        log_index,
                        term,
                    });
                }
                witnesses.lock().insert(replica_id, local);
                continue;
            }

            let wire_reqs: Vec<ChannelLastLogInfoReq> = replica_reqs
                .iter()
                .map(|req| ChannelLastLogInfoReq {
                    channel_id: req.channel.channel_id.clone(),
                    channel_type: req.channel.channel_type,
                })
                .collect();

            let transport = Arc::clone(&self.transport);
            let witnesses = Arc::clone(&witnesses);
            rpc_futures.push(async move {
                let call = transport.request_channel_last_log_info(replica_id, wire_reqs);
                match tokio::time::timeout_at(deadline, call).await {
                    Ok(Ok(resps)) => {
                        // Short critical section; never held across an await.
                        witnesses.lock().insert(replica_id, resps);
                    }
                    Ok(Err(err)) => {
                        warn!(replica_id, error = %err, "witness rpc failed");
                    }
                    Err(_) => {
                        warn!(replica_id, "witness rpc deadline elapsed");
                    }
                }
            });
        }

        futures::future::join_all(rpc_futures).await;

        let map = std::mem::take(&mut *witnesses.lock());
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryReplicaTransport, StaticLiveness};
    use crate::types::{ChannelClusterConfig, ChannelKey};
    use tokio::sync::mpsc;

    struct FixedWitness(u64, u64);
    impl WitnessStore for FixedWitness {
        fn last_index_and_term(&self, _: &str, _: u8) -> wren_msglog::Result<(u64, u64)> {
            Ok((self.0, self.1))
        }
    }

    struct FailingWitness;
    impl WitnessStore for FailingWitness {
        fn last_index_and_term(&self, _: &str, _: u8) -> wren_msglog::Result<(u64, u64)> {
            Err(wren_msglog::Error::NotFound)
        }
    }

    fn request(channel_id: &str, replicas: Vec<u64>) -> ElectionRequest {
        let (result_tx, _rx) = mpsc::channel(1);
        ElectionRequest {
            channel: ChannelKey::new(channel_id, 2),
            config: ChannelClusterConfig {
                channel_id: channel_id.to_string(),
                channel_type: 2,
                replicas,
                term: 1,
                leader_id: 0,
            },
            result_tx,
        }
    }

    fn collector(
        witness_store: Arc<dyn WitnessStore>,
        liveness: Arc<StaticLiveness>,
        transport: Arc<InMemoryReplicaTransport>,
    ) -> WitnessCollector {
        WitnessCollector::new(
            1,
            Duration::from_secs(5),
            witness_store,
            liveness,
            transport,
        )
    }

    #[tokio::test]
    async fn test_collect_merges_local_and_remote() {
        let transport = Arc::new(InMemoryReplicaTransport::new());
        transport.set_witness(2, "c1", 2, 50, 3);
        let liveness = Arc::new(StaticLiveness::new([1, 2]));
        let collector = collector(Arc::new(FixedWitness(100, 4)), liveness, transport);

        let reqs = vec![request("c1", vec![1, 2])];
        let witnesses = collector.collect(&reqs).await.unwrap();

        assert_eq!(witnesses[&1][0].log_index, 100);
        assert_eq!(witnesses[&1][0].term, 4);
        assert_eq!(witnesses[&2][0].log_index, 50);
        assert_eq!(witnesses[&2][0].term, 3);
    }

    #[tokio::test]
    async fn test_offline_replica_is_skipped() {
        let transport = Arc::new(InMemoryReplicaTransport::new());
        transport.set_witness(2, "c1", 2, 50, 3);
        let liveness = Arc::new(StaticLiveness::new([1]));
        liveness.set_online(2, false);
        let collector = collector(Arc::new(FixedWitness(100, 4)), liveness, transport);

        let reqs = vec![request("c1", vec![1, 2])];
        let witnesses = collector.collect(&reqs).await.unwrap();
        assert!(witnesses.contains_key(&1));
        assert!(!witnesses.contains_key(&2));
    }

    #[tokio::test]
    async fn test_rpc_error_contributes_nothing() {
        // Node 3 is online but unknown to the transport: the RPC fails and
        // is absorbed.
        let transport = Arc::new(InMemoryReplicaTransport::new());
        let liveness = Arc::new(StaticLiveness::new([1, 3]));
        let collector = collector(Arc::new(FixedWitness(10, 1)), liveness, transport);

        let reqs = vec![request("c1", vec![1, 3])];
        let witnesses = collector.collect(&reqs).await.unwrap();
        assert!(witnesses.contains_key(&1));
        assert!(!witnesses.contains_key(&3));
    }

    #[tokio::test]
    async fn test_local_store_failure_aborts_round() {
        let transport = Arc::new(InMemoryReplicaTransport::new());
        let liveness = Arc::new(StaticLiveness::new([1]));
        let collector = collector(Arc::new(FailingWitness), liveness, transport);

        let reqs = vec![request("c1", vec![1])];
        let err = collector.collect(&reqs).await.unwrap_err();
        assert!(matches!(err, ElectionError::WitnessCollection(_)));
    }
}

//! External adapter contracts for the election core.
//!
//! The membership service, the per-node witness RPC and the config commit
//! path are external collaborators; the coordinator reaches them through
//! these traits. In-memory implementations back unit and integration tests:
//! - Production liveness comes from the cluster membership/failure detector
//! - Production transport resolves node ids to connections and speaks the
//!   cluster wire protocol
//!
//! All RPC methods are async and bounded by the collector's shared deadline.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{ElectionError, Result};
use crate::types::{ChannelClusterConfig, ChannelLastLogInfoReq, ChannelLastLogInfoResp};

/// Membership/liveness oracle. Consulted once per replica per election round;
/// offline replicas are skipped for the round.
pub trait NodeLiveness: Send + Sync {
    fn is_online(&self, node_id: u64) -> bool;
}

/// Batched witness RPC to one remote replica.
///
/// An unknown or unreachable target is an error; the witness collector
/// absorbs it, so for that round the replica simply contributes nothing.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    async fn request_channel_last_log_info(
        &self,
        target: u64,
        reqs: Vec<ChannelLastLogInfoReq>,
    ) -> Result<Vec<ChannelLastLogInfoResp>>;
}

/// Outbound commit path for elected configs. The coordinator itself only
/// emits configs on result channels; persisting and propagating them is the
/// upper layer's job, expressed through this contract.
#[async_trait]
pub trait ConfigCommitter: Send + Sync {
    async fn commit(&self, config: ChannelClusterConfig) -> Result<()>;
}

/// Fixed membership view for tests and single-process setups.
pub struct StaticLiveness {
    online: RwLock<HashMap<u64, bool>>,
}

impl StaticLiveness {
    pub fn new(online: impl IntoIterator<Item = u64>) -> Self {
        Self {
            online: RwLock::new(online.into_iter().map(|id| (id, true)).collect()),
        }
    }

    pub fn set_online(&self, node_id: u64, online: bool) {
        self.online.write().insert(node_id, online);
    }
}

impl NodeLiveness for StaticLiveness {
    fn is_online(&self, node_id: u64) -> bool {
        self.online.read().get(&node_id).copied().unwrap_or(false)
    }
}

/// In-memory transport for testing (no network).
///
/// Each registered peer is a table of `(channel_id, channel_type)` to
/// `(log_index, term)`. Requests against an unregistered peer fail the way a
/// dead connection would.
#[derive(Default)]
pub struct InMemoryReplicaTransport {
    #[allow(clippy::type_complexity)]
    peers: RwLock<HashMap<u64, HashMap<(String, u8), (u64, u64)>>>,
}

impl InMemoryReplicaTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer (idempotent) and record a witness it will report.
    pub fn set_witness(
        &self,
        node_id: u64,
        channel_id: &str,
        channel_type: u8,
        log_index: u64,
        term: u64,
    ) {
        self.peers
            .write()
            .entry(node_id)
            .or_default()
            .insert((channel_id.to_string(), channel_type), (log_index, term));
    }

    /// Register a peer that reports empty logs for every channel.
    pub fn add_peer(&self, node_id: u64) {
        self.peers.write().entry(node_id).or_default();
    }

    pub fn remove_peer(&self, node_id: u64) {
        self.peers.write().remove(&node_id);
    }
}

#[async_trait]
impl ReplicaTransport for InMemoryReplicaTransport {
    async fn request_channel_last_log_info(
        &self,
        target: u64,
        reqs: Vec<ChannelLastLogInfoReq>,
    ) -> Result<Vec<ChannelLastLogInfoResp>> {
        let peers = self.peers.read();
        let Some(table) = peers.get(&target) else {
            return Err(ElectionError::Transport(format!("peer not found: {target}")));
        };
        Ok(reqs
            .into_iter()
            .map(|req| {
                let (log_index, term) = table
                    .get(&(req.channel_id.clone(), req.channel_type))
                    .copied()
                    .unwrap_or((0, 0));
                ChannelLastLogInfoResp {
                    channel_id: req.channel_id,
                    channel_type: req.channel_type,
                    log_index,
                    term,
                }
            })
            .collect())
    }
}

/// Collects committed configs in memory; for integration tests.
#[derive(Default)]
pub struct InMemoryConfigCommitter {
    committed: Mutex<Vec<ChannelClusterConfig>>,
}

impl InMemoryConfigCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> Vec<ChannelClusterConfig> {
        self.committed.lock().clone()
    }
}

#[async_trait]
impl ConfigCommitter for InMemoryConfigCommitter {
    async fn commit(&self, config: ChannelClusterConfig) -> Result<()> {
        self.committed.lock().push(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_transport_reports_witnesses() {
        let transport = InMemoryReplicaTransport::new();
        transport.set_witness(10, "c1", 2, 100, 7);

        let resps = transport
            .request_channel_last_log_info(
                10,
                vec![
                    ChannelLastLogInfoReq {
                        channel_id: "c1".to_string(),
                        channel_type: 2,
                    },
                    ChannelLastLogInfoReq {
                        channel_id: "c2".to_string(),
                        channel_type: 1,
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(resps[0].log_index, 100);
        assert_eq!(resps[0].term, 7);
        // Unknown channel on a known peer reads as an empty log.
        assert_eq!(resps[1].log_index, 0);
        assert_eq!(resps[1].term, 0);
    }

    #[tokio::test]
    async fn test_in_memory_transport_unknown_peer() {
        let transport = InMemoryReplicaTransport::new();
        let err = transport
            .request_channel_last_log_info(99, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ElectionError::Transport(_)));
    }

    #[test]
    fn test_static_liveness_defaults_offline() {
        let liveness = StaticLiveness::new([1, 2]);
        assert!(liveness.is_online(1));
        assert!(!liveness.is_online(3));
        liveness.set_online(1, false);
        assert!(!liveness.is_online(1));
    }
}

//! Core election types: cluster config, witness wire messages, requests.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use wren_msglog::ChannelKey;

use crate::error::ElectionError;

/// The "no leader" sentinel node id.
pub const NO_LEADER: u64 = 0;

/// A channel's replica set, election term and current leader.
///
/// Across successive committed configs of one channel, `term` strictly
/// increases whenever `leader_id` changes; a config emitted by the
/// coordinator is the input config with `term + 1` and the chosen leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelClusterConfig {
    pub channel_id: String,
    pub channel_type: u8,
    /// Replica node ids, at most `channel_max_replica_count` of them.
    pub replicas: Vec<u64>,
    pub term: u32,
    /// Leader node id, `NO_LEADER` when the channel has none.
    pub leader_id: u64,
}

impl ChannelClusterConfig {
    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey::new(self.channel_id.clone(), self.channel_type)
    }

    pub fn has_leader(&self) -> bool {
        self.leader_id != NO_LEADER
    }
}

/// One entry of the batched witness RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLastLogInfoReq {
    pub channel_id: String,
    pub channel_type: u8,
}

/// One entry of the batched witness RPC response. Responses are keyed by
/// `(channel_id, channel_type)`; their order is not load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLastLogInfoResp {
    pub channel_id: String,
    pub channel_type: u8,
    pub log_index: u64,
    pub term: u64,
}

/// A witness attributed to the replica that reported it, as consumed by the
/// leader-choice rule. Never persisted beyond one election round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaWitness {
    pub replica_id: u64,
    pub log_index: u64,
    pub term: u64,
}

/// Outcome delivered on a request's result channel.
pub type ElectionOutcome = Result<ChannelClusterConfig, ElectionError>;

/// An in-flight election request. Owned by the coordinator from enqueue
/// until the outcome is delivered (or the coordinator stops).
#[derive(Debug)]
pub struct ElectionRequest {
    pub channel: ChannelKey,
    pub config: ChannelClusterConfig,
    /// Bounded handoff back to the requester; capacity 1.
    pub result_tx: mpsc::Sender<ElectionOutcome>,
}

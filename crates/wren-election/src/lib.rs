//! wren-election: per-channel leader election.
//!
//! Decides, among a channel's replica set, which node becomes the term
//! leader based on replicated log state:
//! - A bounded request queue with fail-fast enqueue
//! - A single worker loop draining FIFO micro-batches
//! - A bounded pool running election rounds
//! - A witness collector that merges the local message log's
//!   `(last_index, last_term)` with one batched RPC per remote online replica
//! - Quorum (`max_replicas/2 + 1`) and greatest-`(term, last_index)` leader
//!   choice; the emitted config is the input with `term + 1`
//!
//! Membership, the wire transport and the config commit path are external
//! collaborators behind the traits in [`transport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wren_election::{
//!     ChannelClusterConfig, ElectionConfig, ElectionCoordinator,
//!     InMemoryReplicaTransport, StaticLiveness,
//! };
//!
//! let coordinator = ElectionCoordinator::new(
//!     ElectionConfig::default(),
//!     msg_store,
//!     Arc::new(StaticLiveness::new([1, 2, 3])),
//!     Arc::new(InMemoryReplicaTransport::new()),
//! )?;
//! coordinator.start();
//!
//! let elected = coordinator.elect(current_config).await?;
//! assert_eq!(elected.term, current_config.term + 1);
//! ```

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod error;
mod pool;
pub mod transport;
pub mod types;

pub use collector::{WitnessCollector, WitnessStore};
pub use config::ElectionConfig;
pub use coordinator::ElectionCoordinator;
pub use error::{ElectionError, Result};
pub use transport::{
    ConfigCommitter, InMemoryConfigCommitter, InMemoryReplicaTransport, NodeLiveness,
    ReplicaTransport, StaticLiveness,
};
pub use types::{
    ChannelClusterConfig, ChannelKey, ChannelLastLogInfoReq, ChannelLastLogInfoResp,
    ElectionOutcome, ElectionRequest, ReplicaWitness, NO_LEADER,
};

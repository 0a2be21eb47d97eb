//! Election error types.

use thiserror::Error;

/// Errors surfaced by the election coordinator and its collaborators.
///
/// Cloneable so that a batch-wide failure can be fanned out to every
/// request's result channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    /// The bounded election queue is at capacity.
    #[error("election queue is full")]
    QueueFull,

    /// The coordinator is stopping or stopped.
    #[error("election coordinator is stopped")]
    Stopped,

    /// Reading the local replica's log witness failed. The local node is
    /// authoritative for its own log, so this aborts the whole batch.
    #[error("witness collection failed: {0}")]
    WitnessCollection(String),

    /// Quorum not met for a channel.
    #[error("not enough replicas: have {have}, quorum {quorum}")]
    NotEnoughReplicas { have: usize, quorum: usize },

    /// No replica carried a log worth leading with.
    #[error("no leader could be chosen")]
    NoLeader,

    /// The election worker pool rejected a batch.
    #[error("election pool is saturated (running {running}, size {size})")]
    PoolSaturated { running: usize, size: usize },

    /// Remote witness RPC failure (absorbed by the collector, surfaced only
    /// by transport implementations).
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid coordinator configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ElectionError>;

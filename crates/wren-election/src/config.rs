//! Election coordinator configuration.

use std::time::Duration;

/// Configuration for per-channel leader election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// This node's id. Must be non-zero; 0 is the "no leader" sentinel.
    pub node_id: u64,

    /// Maximum size of a channel's replica set. Quorum is derived from this,
    /// not from the per-channel replica list.
    ///
    /// Default: 3
    pub channel_max_replica_count: u32,

    /// Size of the bounded worker pool that runs election rounds.
    ///
    /// Default: 10
    pub election_pool_size: usize,

    /// Maximum number of requests drained into one election micro-batch.
    ///
    /// Default: 100
    pub max_batch_len: usize,

    /// Capacity of the bounded election request queue. Enqueues beyond this
    /// fail fast with `QueueFull`.
    ///
    /// Default: 1000
    pub queue_cap: usize,

    /// Shared deadline for one round's witness RPC fan-out.
    ///
    /// Default: 5s
    pub collect_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            channel_max_replica_count: 3,
            election_pool_size: 10,
            max_batch_len: 100,
            queue_cap: 1000,
            collect_timeout: Duration::from_secs(5),
        }
    }
}

impl ElectionConfig {
    /// Validate configuration (ensure invariants hold).
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id == 0 {
            return Err("node_id must be non-zero (0 means no leader)".to_string());
        }
        if self.channel_max_replica_count == 0 {
            return Err("channel_max_replica_count must be > 0".to_string());
        }
        if self.election_pool_size == 0 {
            return Err("election_pool_size must be > 0".to_string());
        }
        if self.max_batch_len == 0 {
            return Err("max_batch_len must be > 0".to_string());
        }
        if self.queue_cap == 0 {
            return Err("queue_cap must be > 0".to_string());
        }
        if self.collect_timeout.is_zero() {
            return Err("collect_timeout must be > 0".to_string());
        }
        Ok(())
    }

    /// Votes needed for an election to succeed.
    pub fn quorum(&self) -> usize {
        (self.channel_max_replica_count / 2 + 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ElectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_node_id_rejected() {
        let mut config = ElectionConfig::default();
        config.node_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quorum_arithmetic() {
        let mut config = ElectionConfig::default();
        config.channel_max_replica_count = 3;
        assert_eq!(config.quorum(), 2);
        config.channel_max_replica_count = 5;
        assert_eq!(config.quorum(), 3);
        config.channel_max_replica_count = 1;
        assert_eq!(config.quorum(), 1);
    }
}

//! Message log store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sharded message log store.
///
/// The shard count is fixed at open time. Channels are routed to a shard by
/// `channel_num % shard_count` and never migrate, so changing the count for an
/// existing data directory would strand data.
#[derive(Debug, Clone)]
pub struct MsgLogConfig {
    /// Root directory; each shard opens `shard-<i>` beneath it.
    pub data_dir: PathBuf,

    /// Number of independent shard databases.
    ///
    /// Default: 8
    pub shard_count: u32,

    /// Commit appends and truncations with a durable fsync.
    ///
    /// Default: true
    pub fsync: bool,

    /// Deadline for the concurrent multi-shard append path.
    ///
    /// Default: 5s
    pub batch_append_deadline: Duration,

    /// Log an info line for operations slower than this. `None` disables
    /// cost logging.
    ///
    /// Default: None
    pub slow_op_threshold: Option<Duration>,
}

impl Default for MsgLogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./wren-data"),
            shard_count: 8,
            fsync: true,
            batch_append_deadline: Duration::from_secs(5),
            slow_op_threshold: None,
        }
    }
}

impl MsgLogConfig {
    /// Validate configuration (ensure invariants hold).
    pub fn validate(&self) -> Result<(), String> {
        if self.shard_count == 0 {
            return Err("shard_count must be > 0".to_string());
        }
        if self.batch_append_deadline.is_zero() {
            return Err("batch_append_deadline must be > 0".to_string());
        }
        Ok(())
    }
}

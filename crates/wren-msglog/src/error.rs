use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("write failed: {0}")]
    WriteFailed(rocksdb::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("message not found")]
    NotFound,

    #[error("corrupt key: {0}")]
    CorruptKey(String),

    #[error("shard append deadline exceeded")]
    ShardDeadline,

    #[error("shard append task failed: {0}")]
    ShardTask(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

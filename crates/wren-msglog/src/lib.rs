//! wren-msglog: sharded, embedded message log store.
//!
//! Persists per-channel chat messages in N independent rocksdb shards with:
//! - Column-per-field rows under a big-endian `(channel_num, message_seq)`
//!   primary key, so lexicographic order equals sequence order
//! - Secondary indices (fromUid, clientMsgNo, messageId, timestamp) mapping
//!   to a 16-byte primary handle
//! - A per-channel last-seq row maintained inside every append batch
//! - Cheap `(last_index, last_term)` witnesses for leader election
//!
//! # Architecture
//!
//! ```text
//! MessageLogStore
//!   ├─ shard-0 (rocksdb) ── channels with channel_num % N == 0
//!   ├─ shard-1 (rocksdb) ── channels with channel_num % N == 1
//!   ├─ ...
//!   └─ shard-N-1
//! ```
//!
//! Appends for one channel are a single sync-committed WriteBatch. The
//! cross-shard batch path commits per shard and is not atomic across shards;
//! callers recover by reissuing with the same `client_msg_no`.
//!
//! # Example
//!
//! ```no_run
//! use wren_msglog::{Message, MessageLogStore, MsgLogConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MessageLogStore::open(MsgLogConfig::default())?;
//!
//!     let msg = Message {
//!         message_id: 1001,
//!         message_seq: 1,
//!         ..Default::default()
//!     };
//!     store.append_messages("general", 2, &[msg])?;
//!
//!     let (last_index, last_term) = store.last_index_and_term("general", 2)?;
//!     println!("witness: ({last_index}, {last_term})");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod message;
mod scan;
mod search;
pub mod store;

pub use config::MsgLogConfig;
pub use error::{Error, Result};
pub use message::{
    AppendMessagesReq, ChannelKey, Message, MessageSearchReq, SetChannelLastMessageSeqReq,
};
pub use store::MessageLogStore;

// Re-export key types from dependencies
pub use bytes::Bytes;
pub use wren_observe::{Meter, NoopMeter};

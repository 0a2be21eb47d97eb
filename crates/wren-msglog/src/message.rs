//! Message row type and store request types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a channel: `(channel_id, channel_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub channel_id: String,
    pub channel_type: u8,
}

impl ChannelKey {
    pub fn new(channel_id: impl Into<String>, channel_type: u8) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.channel_type)
    }
}

/// One stored chat message.
///
/// `message_seq` is per-channel monotonic and gap-free, starting at 1; the
/// store never renumbers; callers assign `prev_last_seq + 1, +2, ...`.
/// `message_id` is globally unique, `client_msg_no` is the client-supplied
/// idempotency token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub message_seq: u32,
    pub client_msg_no: String,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub topic: String,
    pub payload: Bytes,
    pub timestamp: i32,
    pub framer: u8,
    pub setting: u8,
    pub expire: u32,
    pub term: u64,
}

impl Message {
    /// Encoded size used by the size-capped range load.
    pub fn encoded_size(&self) -> usize {
        1 // framer
            + 1 // setting
            + 4 // expire
            + 8 // message_id
            + 4 // message_seq
            + 4 // timestamp
            + 1 // channel_type
            + 8 // term
            + self.client_msg_no.len()
            + self.channel_id.len()
            + self.topic.len()
            + self.from_uid.len()
            + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_seq == 0
    }
}

/// A single-channel append request, grouped by shard in the batch path.
#[derive(Debug, Clone)]
pub struct AppendMessagesReq {
    pub channel_id: String,
    pub channel_type: u8,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct SetChannelLastMessageSeqReq {
    pub channel_id: String,
    pub channel_type: u8,
    pub seq: u64,
}

/// Predicates for `search_messages`. Zero / empty fields are unset.
///
/// `message_id` short-circuits to a point lookup. Of the remaining indexable
/// predicates, `from_uid` is preferred over `client_msg_no` as the index;
/// whichever is not used as the index is still applied as a post-filter.
#[derive(Debug, Clone, Default)]
pub struct MessageSearchReq {
    pub message_id: i64,
    pub from_uid: String,
    pub client_msg_no: String,
    pub channel_id: String,
    pub channel_type: u8,
    /// Substring match over the payload bytes.
    pub payload: Bytes,
    pub limit: usize,
    /// 1-based page number.
    pub current_page: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_size_tracks_variable_fields() {
        let mut msg = Message::default();
        let base = msg.encoded_size();
        msg.payload = Bytes::from_static(b"hello");
        msg.from_uid = "u1".to_string();
        assert_eq!(msg.encoded_size(), base + 5 + 2);
    }

    #[test]
    fn test_empty_message_sentinel() {
        assert!(Message::default().is_empty());
        let msg = Message {
            message_seq: 1,
            ..Default::default()
        };
        assert!(!msg.is_empty());
    }
}

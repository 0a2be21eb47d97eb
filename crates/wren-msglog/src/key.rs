//! Key encodings for the sharded message tables.
//!
//! All multi-byte fields are big-endian so that lexicographic key order equals
//! numeric order. Layouts:
//!
//! ```text
//! message column row   0x01 | channel_num(8) | message_seq(8) | column_tag(1)
//! channel last seq     0x02 | channel_num(8)                  -> seq(8) | set_time_ns(8)
//! fromUid index        0x03 | len(1) | from_uid | handle(16)  -> (empty)
//! clientMsgNo index    0x04 | len(1) | client_msg_no | handle(16) -> (empty)
//! messageId index      0x05 | message_id(8)                   -> handle(16)
//! timestamp index      0x06 | timestamp(8) | handle(16)       -> (empty)
//! shard stats          0x07 | stat_tag(1)                     -> count(8)
//! ```
//!
//! The 16-byte primary handle is `channel_num(8) | message_seq(8)` and is the
//! value (or key suffix) of every secondary index.

use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::error::{Error, Result};

pub const TABLE_MESSAGE: u8 = 0x01;
pub const TABLE_CHANNEL_LAST_SEQ: u8 = 0x02;
pub const TABLE_IDX_FROM_UID: u8 = 0x03;
pub const TABLE_IDX_CLIENT_MSG_NO: u8 = 0x04;
pub const TABLE_IDX_MESSAGE_ID: u8 = 0x05;
pub const TABLE_IDX_TIMESTAMP: u8 = 0x06;
pub const TABLE_SHARD_STAT: u8 = 0x07;

/// Column tags for the message table. One row per column per message.
pub mod col {
    pub const MIN: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const SETTING: u8 = 0x02;
    pub const EXPIRE: u8 = 0x03;
    pub const MESSAGE_ID: u8 = 0x04;
    pub const MESSAGE_SEQ: u8 = 0x05;
    pub const CLIENT_MSG_NO: u8 = 0x06;
    pub const TIMESTAMP: u8 = 0x07;
    pub const CHANNEL_ID: u8 = 0x08;
    pub const CHANNEL_TYPE: u8 = 0x09;
    pub const TOPIC: u8 = 0x0a;
    pub const FROM_UID: u8 = 0x0b;
    pub const PAYLOAD: u8 = 0x0c;
    pub const TERM: u8 = 0x0d;
    pub const MAX: u8 = 0xff;
}

pub const STAT_MESSAGE_COUNT: u8 = 0x01;

/// Primary handle: `channel_num(8) | message_seq(8)`.
pub type PrimaryHandle = [u8; 16];

pub const MIN_PRIMARY_HANDLE: PrimaryHandle = [0x00; 16];
pub const MAX_PRIMARY_HANDLE: PrimaryHandle = [0xff; 16];

/// Derive the 64-bit channel number that partitions channels across shards.
pub fn channel_num(channel_id: &str, channel_type: u8) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(channel_id.as_bytes());
    hasher.write(&[channel_type]);
    hasher.finish()
}

pub fn primary_handle(channel_num: u64, message_seq: u64) -> PrimaryHandle {
    let mut handle = [0u8; 16];
    handle[..8].copy_from_slice(&channel_num.to_be_bytes());
    handle[8..].copy_from_slice(&message_seq.to_be_bytes());
    handle
}

/// Key of a single message column row.
pub fn message_column_key(channel_num: u64, message_seq: u64, column: u8) -> [u8; 18] {
    let mut key = [0u8; 18];
    key[0] = TABLE_MESSAGE;
    key[1..9].copy_from_slice(&channel_num.to_be_bytes());
    key[9..17].copy_from_slice(&message_seq.to_be_bytes());
    key[17] = column;
    key
}

/// Column key addressed by a primary handle (as read from a secondary index).
pub fn message_column_key_with_handle(handle: &PrimaryHandle, column: u8) -> [u8; 18] {
    let mut key = [0u8; 18];
    key[0] = TABLE_MESSAGE;
    key[1..17].copy_from_slice(handle);
    key[17] = column;
    key
}

/// Lower/upper bound key for a range scan over `[message_seq, ...)` of one
/// channel. Bounds always use the MIN column tag so the upper bound excludes
/// every column of the end sequence.
pub fn message_seq_bound(channel_num: u64, message_seq: u64) -> [u8; 18] {
    message_column_key(channel_num, message_seq, col::MIN)
}

/// Parse `(channel_num, message_seq, column_tag)` out of a message column
/// key.
pub fn parse_message_column_key(key: &[u8]) -> Result<(u64, u64, u8)> {
    if key.len() != 18 || key[0] != TABLE_MESSAGE {
        return Err(Error::CorruptKey(format!(
            "message column key has {} bytes",
            key.len()
        )));
    }
    let mut channel_num = [0u8; 8];
    channel_num.copy_from_slice(&key[1..9]);
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&key[9..17]);
    Ok((
        u64::from_be_bytes(channel_num),
        u64::from_be_bytes(seq),
        key[17],
    ))
}

pub fn channel_last_seq_key(channel_num: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = TABLE_CHANNEL_LAST_SEQ;
    key[1..].copy_from_slice(&channel_num.to_be_bytes());
    key
}

fn string_index_key(table: u8, value: &str, handle: &PrimaryHandle) -> Vec<u8> {
    // Length-prefixed so that "ab"+"c..." never collides with "a"+"bc...".
    let bytes = value.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    let mut key = Vec::with_capacity(2 + len + 16);
    key.push(table);
    key.push(len as u8);
    key.extend_from_slice(&bytes[..len]);
    key.extend_from_slice(handle);
    key
}

pub fn from_uid_index_key(from_uid: &str, handle: &PrimaryHandle) -> Vec<u8> {
    string_index_key(TABLE_IDX_FROM_UID, from_uid, handle)
}

pub fn client_msg_no_index_key(client_msg_no: &str, handle: &PrimaryHandle) -> Vec<u8> {
    string_index_key(TABLE_IDX_CLIENT_MSG_NO, client_msg_no, handle)
}

pub fn message_id_index_key(message_id: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = TABLE_IDX_MESSAGE_ID;
    key[1..].copy_from_slice(&message_id.to_be_bytes());
    key
}

pub fn timestamp_index_key(timestamp: u64, handle: &PrimaryHandle) -> [u8; 25] {
    let mut key = [0u8; 25];
    key[0] = TABLE_IDX_TIMESTAMP;
    key[1..9].copy_from_slice(&timestamp.to_be_bytes());
    key[9..].copy_from_slice(handle);
    key
}

pub fn shard_stat_key(stat: u8) -> [u8; 2] {
    [TABLE_SHARD_STAT, stat]
}

/// Extract the trailing primary handle from a string-suffixed secondary index
/// key (fromUid / clientMsgNo).
pub fn parse_secondary_index_key(key: &[u8]) -> Result<PrimaryHandle> {
    if key.len() < 2 + 16 {
        return Err(Error::CorruptKey(format!(
            "secondary index key has {} bytes",
            key.len()
        )));
    }
    let mut handle = [0u8; 16];
    handle.copy_from_slice(&key[key.len() - 16..]);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_num_deterministic() {
        assert_eq!(channel_num("c1", 2), channel_num("c1", 2));
        assert_ne!(channel_num("c1", 2), channel_num("c1", 3));
        assert_ne!(channel_num("c1", 2), channel_num("c2", 2));
    }

    #[test]
    fn test_column_key_order_follows_seq_order() {
        let num = channel_num("room", 1);
        let a = message_column_key(num, 1, col::PAYLOAD);
        let b = message_column_key(num, 2, col::HEADER);
        // Lexicographic order must equal sequence order regardless of tags.
        assert!(a < b);

        let lo = message_seq_bound(num, 2);
        assert!(a < lo);
        assert!(lo < b);
    }

    #[test]
    fn test_column_key_roundtrip() {
        let num = channel_num("room", 1);
        let key = message_column_key(num, 42, col::TERM);
        let (parsed_num, seq, tag) = parse_message_column_key(&key).unwrap();
        assert_eq!(parsed_num, num);
        assert_eq!(seq, 42);
        assert_eq!(tag, col::TERM);
    }

    #[test]
    fn test_parse_rejects_short_keys() {
        assert!(parse_message_column_key(b"\x01tooshort").is_err());
        assert!(parse_secondary_index_key(b"\x03\x01x").is_err());
    }

    #[test]
    fn test_secondary_index_handle_roundtrip() {
        let handle = primary_handle(7, 9);
        let key = from_uid_index_key("u100", &handle);
        assert_eq!(parse_secondary_index_key(&key).unwrap(), handle);
    }

    #[test]
    fn test_string_index_keys_do_not_collide() {
        let handle = primary_handle(1, 1);
        let a = from_uid_index_key("ab", &handle);
        let b = from_uid_index_key("a", &handle);
        assert_ne!(a, b);
        // Different table, same value.
        let c = client_msg_no_index_key("ab", &handle);
        assert_ne!(a, c);
    }
}

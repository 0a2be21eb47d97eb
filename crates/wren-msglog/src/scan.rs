//! Column-row reconstruction scans.
//!
//! A message is persisted as one row per column, all sharing the
//! `(channel_num, message_seq)` prefix. Scans accumulate columns into a
//! partial message and flush it when the sequence number changes; the final
//! row is flushed at end of scan. Reverse scans visit every column of a
//! sequence before crossing to the previous one, so the same
//! boundary-triggered flush applies in both directions.
//!
//! Variable-length columns (payload, strings) are copied out of the
//! iterator's buffer before the iterator advances; the iterator aliases
//! internal storage and the bytes do not survive the next step.

use bytes::Bytes;
use rocksdb::{DBRawIteratorWithThreadMode, ReadOptions, DB};
use tracing::error;

use crate::error::Result;
use crate::key::{self, col};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanDirection {
    Forward,
    Reverse,
}

/// Accumulates column rows of a single `message_seq` into a `Message`.
#[derive(Default)]
struct RowBuilder {
    msg: Message,
}

impl RowBuilder {
    fn start(message_seq: u64) -> Self {
        Self {
            msg: Message {
                message_seq: message_seq as u32,
                ..Default::default()
            },
        }
    }

    fn apply(&mut self, column: u8, value: &[u8]) {
        match column {
            col::HEADER => {
                if let Some(&b) = value.first() {
                    self.msg.framer = b;
                }
            }
            col::SETTING => {
                if let Some(&b) = value.first() {
                    self.msg.setting = b;
                }
            }
            col::EXPIRE => {
                if let Ok(raw) = <[u8; 4]>::try_from(value) {
                    self.msg.expire = u32::from_be_bytes(raw);
                }
            }
            col::MESSAGE_ID => {
                if let Ok(raw) = <[u8; 8]>::try_from(value) {
                    self.msg.message_id = u64::from_be_bytes(raw) as i64;
                }
            }
            col::MESSAGE_SEQ => {
                // Redundant with the key; the key wins.
            }
            col::CLIENT_MSG_NO => {
                self.msg.client_msg_no = String::from_utf8_lossy(value).into_owned();
            }
            col::TIMESTAMP => {
                if let Ok(raw) = <[u8; 4]>::try_from(value) {
                    self.msg.timestamp = u32::from_be_bytes(raw) as i32;
                }
            }
            col::CHANNEL_ID => {
                self.msg.channel_id = String::from_utf8_lossy(value).into_owned();
            }
            col::CHANNEL_TYPE => {
                if let Some(&b) = value.first() {
                    self.msg.channel_type = b;
                }
            }
            col::TOPIC => {
                self.msg.topic = String::from_utf8_lossy(value).into_owned();
            }
            col::FROM_UID => {
                self.msg.from_uid = String::from_utf8_lossy(value).into_owned();
            }
            col::PAYLOAD => {
                // Copy: the slice aliases the iterator's internal buffer.
                self.msg.payload = Bytes::copy_from_slice(value);
            }
            col::TERM => {
                if let Ok(raw) = <[u8; 8]>::try_from(value) {
                    self.msg.term = u64::from_be_bytes(raw);
                }
            }
            other => {
                // Unknown column from a newer schema; ignore the row.
                let _ = other;
            }
        }
    }

    fn finish(self) -> Message {
        self.msg
    }
}

fn advance(iter: &mut DBRawIteratorWithThreadMode<'_, DB>, direction: ScanDirection) {
    match direction {
        ScanDirection::Forward => iter.next(),
        ScanDirection::Reverse => iter.prev(),
    }
}

/// Scan message column rows in `[lower, upper)` and emit reconstructed
/// messages to `on_msg` until it returns `false`, `limit` messages have been
/// emitted (`0` = unlimited), or the range is exhausted.
///
/// Corrupt column keys are logged and skipped; the scan continues.
pub(crate) fn scan_messages<F>(
    db: &DB,
    lower: Vec<u8>,
    upper: Vec<u8>,
    limit: usize,
    direction: ScanDirection,
    mut on_msg: F,
) -> Result<()>
where
    F: FnMut(Message) -> bool,
{
    let mut opts = ReadOptions::default();
    opts.set_iterate_lower_bound(lower);
    opts.set_iterate_upper_bound(upper);
    let mut iter = db.raw_iterator_opt(opts);

    match direction {
        ScanDirection::Forward => iter.seek_to_first(),
        ScanDirection::Reverse => iter.seek_to_last(),
    }

    let mut emitted = 0usize;
    // Row identity is (channel_num, message_seq): a whole-table scan must
    // not merge rows of adjacent channels that share a sequence number.
    let mut current: Option<((u64, u64), RowBuilder)> = None;

    while iter.valid() {
        let (channel_num, message_seq, column) =
            match iter.key().map(key::parse_message_column_key) {
                Some(Ok(parsed)) => parsed,
                Some(Err(err)) => {
                    error!(error = %err, "skipping corrupt message column key");
                    advance(&mut iter, direction);
                    continue;
                }
                None => break,
            };
        let row = (channel_num, message_seq);

        if let Some((prev_row, builder)) = current.take() {
            if prev_row != row {
                emitted += 1;
                let keep_going = on_msg(builder.finish());
                if !keep_going || (limit != 0 && emitted >= limit) {
                    return Ok(());
                }
                current = Some((row, RowBuilder::start(message_seq)));
            } else {
                current = Some((prev_row, builder));
            }
        } else {
            current = Some((row, RowBuilder::start(message_seq)));
        }

        if let (Some((_, builder)), Some(value)) = (current.as_mut(), iter.value()) {
            builder.apply(column, value);
        }
        advance(&mut iter, direction);
    }
    iter.status()?;

    if let Some((_, builder)) = current {
        on_msg(builder.finish());
    }
    Ok(())
}

/// Forward scan capped by cumulative encoded size rather than row count.
/// The message that crosses the cap is still included.
pub(crate) fn scan_messages_for_size(
    db: &DB,
    lower: Vec<u8>,
    upper: Vec<u8>,
    limit_bytes: u64,
) -> Result<Vec<Message>> {
    let mut msgs = Vec::new();
    let mut size = 0u64;
    scan_messages(db, lower, upper, 0, ScanDirection::Forward, |msg| {
        size += msg.encoded_size() as u64;
        msgs.push(msg);
        limit_bytes == 0 || size < limit_bytes
    })?;
    Ok(msgs)
}

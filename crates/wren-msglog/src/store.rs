//! Sharded message log store.
//!
//! Owns `shard_count` independent rocksdb databases. A channel is routed to
//! shard `channel_num % shard_count` and never migrates. Appends commit a
//! single WriteBatch per shard with durable sync; cross-shard batches are
//! committed per shard and are NOT atomic across shards; callers recover
//! from partial failure by reissuing with the same `client_msg_no`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use tracing::{info, warn};
use wren_observe::{CoreEvent, Meter, MsgLogEvt, MsgLogKind, NoopMeter};

use crate::config::MsgLogConfig;
use crate::error::{Error, Result};
use crate::key::{self, col, PrimaryHandle, STAT_MESSAGE_COUNT};
use crate::message::{AppendMessagesReq, Message, SetChannelLastMessageSeqReq};
use crate::scan::{self, ScanDirection};

pub struct MessageLogStore {
    shards: Vec<Arc<DB>>,
    config: MsgLogConfig,
    meter: Arc<dyn Meter>,
}

impl MessageLogStore {
    /// Open (or create) all shard databases under `config.data_dir`.
    pub fn open(config: MsgLogConfig) -> Result<Self> {
        Self::open_with_meter(config, Arc::new(NoopMeter))
    }

    pub fn open_with_meter(config: MsgLogConfig, meter: Arc<dyn Meter>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);

        let mut shards = Vec::with_capacity(config.shard_count as usize);
        for shard in 0..config.shard_count {
            let path = config.data_dir.join(format!("shard-{shard}"));
            std::fs::create_dir_all(&path)?;
            shards.push(Arc::new(DB::open(&db_opts, &path)?));
        }
        Ok(Self {
            shards,
            config,
            meter,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Shard index a channel is routed to. Stable for the store's lifetime.
    pub fn shard_index(&self, channel_id: &str, channel_type: u8) -> u32 {
        (key::channel_num(channel_id, channel_type) % self.shards.len() as u64) as u32
    }

    fn channel_db(&self, channel_id: &str, channel_type: u8) -> &Arc<DB> {
        &self.shards[self.shard_index(channel_id, channel_type) as usize]
    }

    fn write_opts(fsync: bool) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(fsync);
        opts
    }

    fn log_slow(&self, op: &'static str, start: Instant) {
        if let Some(threshold) = self.config.slow_op_threshold {
            let cost = start.elapsed();
            if cost > threshold {
                info!(op, cost_ms = cost.as_millis() as u64, "slow msglog operation");
            }
        }
    }

    /// Atomic per-channel append. All column rows, secondary indices and the
    /// updated channel-last-seq row land in one sync-committed batch.
    ///
    /// Callers assign `message_seq` as `prev_last_seq + 1, +2, ...`; the
    /// store does not renumber.
    pub fn append_messages(
        &self,
        channel_id: &str,
        channel_type: u8,
        msgs: &[Message],
    ) -> Result<()> {
        if msgs.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let shard = self.shard_index(channel_id, channel_type);
        let req = AppendMessagesReq {
            channel_id: channel_id.to_string(),
            channel_type,
            messages: msgs.to_vec(),
        };
        Self::write_reqs_to_shard(
            &self.shards[shard as usize],
            std::slice::from_ref(&req),
            self.config.fsync,
        )?;
        self.meter.emit(CoreEvent::MsgLog(MsgLogEvt {
            shard,
            kind: MsgLogKind::Append {
                msgs: msgs.len(),
                ms: start.elapsed().as_millis() as u32,
            },
        }));
        self.log_slow("append_messages", start);
        Ok(())
    }

    /// Append requests for many channels, grouped by destination shard.
    ///
    /// A single involved shard is written inline; otherwise each shard is
    /// written concurrently under `batch_append_deadline`. Per-shard commits
    /// are atomic; the whole operation is not. On error, already-committed
    /// shards stay committed and the first error is returned.
    pub async fn append_messages_batch(&self, reqs: Vec<AppendMessagesReq>) -> Result<()> {
        if reqs.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let mut total_msgs = 0usize;
        let mut by_shard: HashMap<u32, Vec<AppendMessagesReq>> = HashMap::new();
        for req in reqs {
            total_msgs += req.messages.len();
            let shard = self.shard_index(&req.channel_id, req.channel_type);
            by_shard.entry(shard).or_default().push(req);
        }
        let shard_count = by_shard.len();

        if shard_count == 1 {
            if let Some((shard, reqs)) = by_shard.into_iter().next() {
                Self::write_reqs_to_shard(&self.shards[shard as usize], &reqs, self.config.fsync)?;
            }
        } else {
            let mut tasks = Vec::with_capacity(shard_count);
            for (shard, reqs) in by_shard {
                let db = Arc::clone(&self.shards[shard as usize]);
                let fsync = self.config.fsync;
                tasks.push(tokio::task::spawn_blocking(move || {
                    Self::write_reqs_to_shard(&db, &reqs, fsync)
                }));
            }
            let joined = tokio::time::timeout(
                self.config.batch_append_deadline,
                futures::future::join_all(tasks),
            )
            .await
            .map_err(|_| Error::ShardDeadline)?;
            for res in joined {
                res.map_err(|e| Error::ShardTask(e.to_string()))??;
            }
        }

        self.meter.emit(CoreEvent::MsgLog(MsgLogEvt {
            shard: 0,
            kind: MsgLogKind::BatchAppend {
                shards: shard_count,
                msgs: total_msgs,
            },
        }));
        self.log_slow("append_messages_batch", start);
        Ok(())
    }

    fn write_reqs_to_shard(db: &DB, reqs: &[AppendMessagesReq], fsync: bool) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut appended = 0u64;
        for req in reqs {
            let Some(last) = req.messages.last() else {
                continue;
            };
            let channel_num = key::channel_num(&req.channel_id, req.channel_type);
            for msg in &req.messages {
                write_message_rows(&mut batch, channel_num, msg);
            }
            put_channel_last_seq(&mut batch, channel_num, last.message_seq as u64);
            appended += req.messages.len() as u64;
        }
        bump_message_count(db, &mut batch, appended)?;
        db.write_opt(batch, &Self::write_opts(fsync))
            .map_err(Error::WriteFailed)
    }

    /// Messages with `message_seq` in `(end, start]`, newest-bounded, capped
    /// by `limit`. `end == 0` means "as far back as `limit` reaches".
    pub fn load_prev_range_msgs(
        &self,
        channel_id: &str,
        channel_type: u8,
        start_seq: u64,
        end_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        if start_seq == 0 {
            return Err(Error::InvalidRange(
                "start message_seq must be greater than 0".to_string(),
            ));
        }
        if end_seq != 0 && end_seq > start_seq {
            return Err(Error::InvalidRange(format!(
                "end message_seq[{end_seq}] must not exceed start message_seq[{start_seq}]"
            )));
        }

        let limit = limit as u64;
        let max_seq = start_seq + 1;
        let min_seq = if end_seq == 0 {
            if start_seq < limit {
                1
            } else {
                start_seq - limit + 1
            }
        } else if start_seq - end_seq > limit {
            start_seq - limit + 1
        } else {
            end_seq + 1
        };

        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        let max_seq = if max_seq > last_seq {
            last_seq + 1
        } else {
            max_seq
        };

        self.load_range(
            channel_id,
            channel_type,
            min_seq,
            max_seq,
            limit as usize,
        )
    }

    /// Messages with `message_seq` in `[start, end)`, `end == 0` meaning "to
    /// the end of the log", clamped to `last_seq + 1`.
    pub fn load_next_range_msgs(
        &self,
        channel_id: &str,
        channel_type: u8,
        start_seq: u64,
        end_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let max_seq = if end_seq == 0 { u64::MAX } else { end_seq };
        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        let max_seq = if max_seq > last_seq {
            last_seq + 1
        } else {
            max_seq
        };
        self.load_range(channel_id, channel_type, start_seq, max_seq, limit)
    }

    /// Like `load_next_range_msgs` but capped by cumulative encoded size in
    /// bytes; the message crossing the cap is still included.
    pub fn load_next_range_msgs_for_size(
        &self,
        channel_id: &str,
        channel_type: u8,
        start_seq: u64,
        end_seq: u64,
        limit_bytes: u64,
    ) -> Result<Vec<Message>> {
        let start = Instant::now();
        let max_seq = if end_seq == 0 { u64::MAX } else { end_seq };
        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        let max_seq = if max_seq > last_seq {
            last_seq + 1
        } else {
            max_seq
        };

        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        let msgs = scan::scan_messages_for_size(
            db,
            key::message_seq_bound(channel_num, start_seq).to_vec(),
            key::message_seq_bound(channel_num, max_seq).to_vec(),
            limit_bytes,
        )?;
        self.log_slow("load_next_range_msgs_for_size", start);
        Ok(msgs)
    }

    fn load_range(
        &self,
        channel_id: &str,
        channel_type: u8,
        min_seq: u64,
        max_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        let mut msgs = Vec::new();
        scan::scan_messages(
            db,
            key::message_seq_bound(channel_num, min_seq).to_vec(),
            key::message_seq_bound(channel_num, max_seq).to_vec(),
            limit,
            ScanDirection::Forward,
            |msg| {
                msgs.push(msg);
                true
            },
        )?;
        Ok(msgs)
    }

    /// Load the single message at `message_seq`.
    pub fn load_msg(&self, channel_id: &str, channel_type: u8, seq: u64) -> Result<Message> {
        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        let mut found = None;
        scan::scan_messages(
            db,
            key::message_seq_bound(channel_num, seq).to_vec(),
            key::message_seq_bound(channel_num, seq + 1).to_vec(),
            1,
            ScanDirection::Forward,
            |msg| {
                found = Some(msg);
                false
            },
        )?;
        match found {
            Some(msg) if !msg.is_empty() => Ok(msg),
            _ => Err(Error::NotFound),
        }
    }

    /// The newest `limit` messages of a channel, ascending.
    pub fn load_last_msgs(
        &self,
        channel_id: &str,
        channel_type: u8,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        if last_seq == 0 {
            return Ok(Vec::new());
        }
        self.load_prev_range_msgs(channel_id, channel_type, last_seq, 0, limit)
    }

    pub fn load_last_msgs_with_end(
        &self,
        channel_id: &str,
        channel_type: u8,
        end_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        if last_seq == 0 {
            return Ok(Vec::new());
        }
        self.load_prev_range_msgs(channel_id, channel_type, last_seq, end_seq, limit)
    }

    /// Locate a message anywhere in the store via the messageId index.
    pub fn get_message(&self, message_id: i64) -> Result<Message> {
        let idx_key = key::message_id_index_key(message_id as u64);
        for db in &self.shards {
            let Some(value) = db.get(idx_key)? else {
                continue;
            };
            let handle: PrimaryHandle = value.as_slice().try_into().map_err(|_| {
                Error::CorruptKey(format!("messageId index value has {} bytes", value.len()))
            })?;
            let mut found = None;
            scan::scan_messages(
                db,
                key::message_column_key_with_handle(&handle, col::MIN).to_vec(),
                key::message_column_key_with_handle(&handle, col::MAX).to_vec(),
                1,
                ScanDirection::Forward,
                |msg| {
                    found = Some(msg);
                    false
                },
            )?;
            return match found {
                Some(msg) if !msg.is_empty() => Ok(msg),
                _ => Err(Error::NotFound),
            };
        }
        Err(Error::NotFound)
    }

    /// Atomically delete `[seq, ∞)` and reset the channel-last-seq row to
    /// `seq - 1`.
    pub fn truncate_log_to(&self, channel_id: &str, channel_type: u8, seq: u64) -> Result<()> {
        if seq == 0 {
            return Err(Error::InvalidRange(
                "truncate message_seq must be greater than 0".to_string(),
            ));
        }
        let start = Instant::now();
        let channel_num = key::channel_num(channel_id, channel_type);
        let shard = self.shard_index(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);

        let mut batch = WriteBatch::default();
        batch.delete_range(
            key::message_seq_bound(channel_num, seq),
            key::message_seq_bound(channel_num, u64::MAX),
        );
        put_channel_last_seq(&mut batch, channel_num, seq - 1);
        db.write_opt(batch, &Self::write_opts(self.config.fsync))
            .map_err(Error::WriteFailed)?;

        self.meter.emit(CoreEvent::MsgLog(MsgLogEvt {
            shard,
            kind: MsgLogKind::Truncate { seq },
        }));
        self.log_slow("truncate_log_to", start);
        Ok(())
    }

    /// `(seq, set_time_ns)` of the channel-last-seq row; `(0, 0)` for an
    /// unknown channel.
    pub fn channel_last_message_seq(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> Result<(u64, u64)> {
        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        match db.get(key::channel_last_seq_key(channel_num))? {
            Some(value) if value.len() >= 16 => {
                let mut seq = [0u8; 8];
                seq.copy_from_slice(&value[..8]);
                let mut set_time = [0u8; 8];
                set_time.copy_from_slice(&value[8..16]);
                Ok((u64::from_be_bytes(seq), u64::from_be_bytes(set_time)))
            }
            Some(value) => Err(Error::CorruptKey(format!(
                "channel last seq value has {} bytes",
                value.len()
            ))),
            None => Ok((0, 0)),
        }
    }

    pub fn set_channel_last_message_seq(
        &self,
        channel_id: &str,
        channel_type: u8,
        seq: u64,
    ) -> Result<()> {
        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        let mut batch = WriteBatch::default();
        put_channel_last_seq(&mut batch, channel_num, seq);
        db.write_opt(batch, &Self::write_opts(self.config.fsync))
            .map_err(Error::WriteFailed)
    }

    /// Set many channel-last-seq rows, one batch per destination shard.
    pub fn set_channel_last_message_seq_batch(
        &self,
        reqs: &[SetChannelLastMessageSeqReq],
    ) -> Result<()> {
        if reqs.is_empty() {
            return Ok(());
        }
        let mut by_shard: HashMap<u32, Vec<&SetChannelLastMessageSeqReq>> = HashMap::new();
        for req in reqs {
            let shard = self.shard_index(&req.channel_id, req.channel_type);
            by_shard.entry(shard).or_default().push(req);
        }
        for (shard, reqs) in by_shard {
            let db = &self.shards[shard as usize];
            let mut batch = WriteBatch::default();
            for req in reqs {
                let channel_num = key::channel_num(&req.channel_id, req.channel_type);
                put_channel_last_seq(&mut batch, channel_num, req.seq);
            }
            db.write_opt(batch, &Self::write_opts(self.config.fsync))
                .map_err(Error::WriteFailed)?;
        }
        Ok(())
    }

    /// Election witness: `(last_index, last_term)` of the channel's log.
    ///
    /// `last_index` is the channel-last-seq row; `last_term` is the term
    /// column of the row at that sequence, or 0 for an empty channel. One
    /// point lookup plus one bounded point read.
    pub fn last_index_and_term(&self, channel_id: &str, channel_type: u8) -> Result<(u64, u64)> {
        let (last_seq, _) = self.channel_last_message_seq(channel_id, channel_type)?;
        if last_seq == 0 {
            return Ok((0, 0));
        }
        let channel_num = key::channel_num(channel_id, channel_type);
        let db = self.channel_db(channel_id, channel_type);
        let term = match db.get(key::message_column_key(channel_num, last_seq, col::TERM))? {
            Some(value) => match <[u8; 8]>::try_from(value.as_slice()) {
                Ok(raw) => u64::from_be_bytes(raw),
                Err(_) => {
                    warn!(
                        channel_id,
                        channel_type, last_seq, "term column has unexpected width, treating as 0"
                    );
                    0
                }
            },
            None => 0,
        };
        Ok((last_seq, term))
    }

    /// Advisory total number of messages appended across all shards.
    pub fn total_message_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for db in &self.shards {
            total += read_message_count(db)?;
        }
        Ok(total)
    }

    pub(crate) fn shards(&self) -> &[Arc<DB>] {
        &self.shards
    }

    pub(crate) fn meter(&self) -> &Arc<dyn Meter> {
        &self.meter
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn put_channel_last_seq(batch: &mut WriteBatch, channel_num: u64, seq: u64) {
    let mut value = [0u8; 16];
    value[..8].copy_from_slice(&seq.to_be_bytes());
    value[8..].copy_from_slice(&now_ns().to_be_bytes());
    batch.put(key::channel_last_seq_key(channel_num), value);
}

/// Write the column rows and secondary indices of one message.
fn write_message_rows(batch: &mut WriteBatch, channel_num: u64, msg: &Message) {
    let seq = msg.message_seq as u64;
    let put = |batch: &mut WriteBatch, column: u8, value: &[u8]| {
        batch.put(key::message_column_key(channel_num, seq, column), value);
    };

    put(batch, col::HEADER, &[msg.framer]);
    put(batch, col::SETTING, &[msg.setting]);
    put(batch, col::EXPIRE, &msg.expire.to_be_bytes());
    put(batch, col::MESSAGE_ID, &(msg.message_id as u64).to_be_bytes());
    put(batch, col::MESSAGE_SEQ, &seq.to_be_bytes());
    put(batch, col::CLIENT_MSG_NO, msg.client_msg_no.as_bytes());
    put(
        batch,
        col::TIMESTAMP,
        &(msg.timestamp as u32).to_be_bytes(),
    );
    put(batch, col::CHANNEL_ID, msg.channel_id.as_bytes());
    put(batch, col::CHANNEL_TYPE, &[msg.channel_type]);
    put(batch, col::TOPIC, msg.topic.as_bytes());
    put(batch, col::FROM_UID, msg.from_uid.as_bytes());
    put(batch, col::PAYLOAD, &msg.payload);
    put(batch, col::TERM, &msg.term.to_be_bytes());

    let handle = key::primary_handle(channel_num, seq);
    batch.put(key::from_uid_index_key(&msg.from_uid, &handle), b"");
    batch.put(key::message_id_index_key(msg.message_id as u64), handle);
    batch.put(key::client_msg_no_index_key(&msg.client_msg_no, &handle), b"");
    batch.put(key::timestamp_index_key(msg.timestamp as u64, &handle), b"");
}

fn read_message_count(db: &DB) -> Result<u64> {
    match db.get(key::shard_stat_key(STAT_MESSAGE_COUNT))? {
        Some(value) => {
            let raw = <[u8; 8]>::try_from(value.as_slice()).map_err(|_| {
                Error::CorruptKey(format!("message count value has {} bytes", value.len()))
            })?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

fn bump_message_count(db: &DB, batch: &mut WriteBatch, delta: u64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let current = read_message_count(db)?;
    batch.put(
        key::shard_stat_key(STAT_MESSAGE_COUNT),
        (current + delta).to_be_bytes(),
    );
    Ok(())
}

//! Secondary-index message search.
//!
//! `message_id` degenerates to a point lookup. Otherwise the most selective
//! present index among `{from_uid, client_msg_no}` drives the scan (fromUid
//! first); remaining predicates are applied as in-memory post-filters. With
//! no usable index the search falls back to a channel-prefix scan. Index
//! iteration is in reverse key order, so results come newest first.

use rocksdb::{ReadOptions, DB};
use tracing::error;
use wren_observe::{CoreEvent, MsgLogEvt, MsgLogKind};

use crate::error::{Error, Result};
use crate::key::{self, col, MAX_PRIMARY_HANDLE, MIN_PRIMARY_HANDLE, TABLE_MESSAGE};
use crate::message::{Message, MessageSearchReq};
use crate::scan::{self, ScanDirection};
use crate::store::MessageLogStore;

/// Applies post-filters and `(current_page, limit)` pagination.
struct SearchSink<'a> {
    req: &'a MessageSearchReq,
    page: usize,
    matched: usize,
    msgs: Vec<Message>,
}

impl<'a> SearchSink<'a> {
    fn new(req: &'a MessageSearchReq) -> Self {
        Self {
            req,
            page: req.current_page.max(1),
            matched: 0,
            msgs: Vec::new(),
        }
    }

    /// Returns false once the current page is complete.
    fn offer(&mut self, msg: Message) -> bool {
        if !self.matches(&msg) {
            return true;
        }
        if self.req.limit > 0 && self.matched > self.req.limit * self.page {
            return false;
        }
        self.matched += 1;
        if self.req.limit == 0
            || (self.matched > (self.page - 1) * self.req.limit
                && self.matched <= self.page * self.req.limit)
        {
            self.msgs.push(msg);
        }
        true
    }

    fn matches(&self, msg: &Message) -> bool {
        let req = self.req;
        if !req.channel_id.trim().is_empty() && msg.channel_id != req.channel_id {
            return false;
        }
        if req.channel_type != 0 && msg.channel_type != req.channel_type {
            return false;
        }
        if !req.from_uid.trim().is_empty() && msg.from_uid != req.from_uid {
            return false;
        }
        if !req.client_msg_no.trim().is_empty() && msg.client_msg_no != req.client_msg_no {
            return false;
        }
        if !req.payload.is_empty() && !contains(&msg.payload, &req.payload) {
            return false;
        }
        true
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

impl MessageLogStore {
    pub fn search_messages(&self, req: &MessageSearchReq) -> Result<Vec<Message>> {
        if req.message_id > 0 {
            return match self.get_message(req.message_id) {
                Ok(msg) => Ok(vec![msg]),
                Err(Error::NotFound) => Ok(Vec::new()),
                Err(err) => Err(err),
            };
        }

        let mut sink = SearchSink::new(req);
        for db in self.shards() {
            if self.search_by_index(db, req, &mut sink)? {
                continue;
            }
            self.channel_prefix_scan(db, req, &mut sink)?;
        }

        let mut msgs = sink.msgs;
        if req.limit > 0 && msgs.len() > req.limit {
            msgs.truncate(req.limit);
        }
        Ok(msgs)
    }

    /// Drive the search from a secondary index, newest entries first.
    /// Returns false when no indexable predicate is present.
    fn search_by_index(
        &self,
        db: &DB,
        req: &MessageSearchReq,
        sink: &mut SearchSink<'_>,
    ) -> Result<bool> {
        let (low, high) = if !req.from_uid.trim().is_empty() {
            (
                key::from_uid_index_key(&req.from_uid, &MIN_PRIMARY_HANDLE),
                key::from_uid_index_key(&req.from_uid, &MAX_PRIMARY_HANDLE),
            )
        } else if !req.client_msg_no.trim().is_empty() {
            (
                key::client_msg_no_index_key(&req.client_msg_no, &MIN_PRIMARY_HANDLE),
                key::client_msg_no_index_key(&req.client_msg_no, &MAX_PRIMARY_HANDLE),
            )
        } else {
            return Ok(false);
        };

        let mut opts = ReadOptions::default();
        opts.set_iterate_lower_bound(low);
        opts.set_iterate_upper_bound(high);
        let mut iter = db.raw_iterator_opt(opts);
        iter.seek_to_last();

        while iter.valid() {
            let handle = match iter.key().map(key::parse_secondary_index_key) {
                Some(Ok(handle)) => handle,
                Some(Err(err)) => {
                    error!(error = %err, "skipping corrupt secondary index key");
                    self.meter().emit(CoreEvent::MsgLog(MsgLogEvt {
                        shard: 0,
                        kind: MsgLogKind::CorruptKeySkipped,
                    }));
                    iter.prev();
                    continue;
                }
                None => break,
            };

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
            if let Some(msg) = found {
                if !sink.offer(msg) {
                    break;
                }
            }
            iter.prev();
        }
        iter.status()?;
        Ok(true)
    }

    /// Fallback when no secondary index applies: reverse scan of the
    /// channel's primary range, or of the whole message table when no
    /// channel is given.
    fn channel_prefix_scan(
        &self,
        db: &DB,
        req: &MessageSearchReq,
        sink: &mut SearchSink<'_>,
    ) -> Result<()> {
        let (low, high) = if !req.channel_id.trim().is_empty() {
            let channel_num = key::channel_num(&req.channel_id, req.channel_type);
            (
                key::message_seq_bound(channel_num, 0).to_vec(),
                key::message_seq_bound(channel_num, u64::MAX).to_vec(),
            )
        } else {
            (vec![TABLE_MESSAGE], vec![TABLE_MESSAGE + 1])
        };
        scan::scan_messages(db, low, high, 0, ScanDirection::Reverse, |msg| {
            sink.offer(msg)
        })
    }
}

//! Per-channel election coordinator.
//!
//! Requests enter a bounded queue; a single worker loop drains them into
//! FIFO micro-batches and dispatches each batch to the bounded election
//! pool. A pool worker collects witnesses, applies the quorum and
//! leader-choice rules, and delivers one outcome per request on its result
//! channel. Within a batch, delivery order is unspecified; across batches no
//! ordering is guaranteed at all: two back-to-back requests for the same
//! channel may resolve in different batches, the later one committing the
//! higher term.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wren_observe::{CoreEvent, ElectionEvt, ElectionKind, Meter, NoopMeter};

use crate::collector::{WitnessCollector, WitnessStore};
use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};
use crate::pool::ElectionPool;
use crate::transport::{NodeLiveness, ReplicaTransport};
use crate::types::{
    ChannelClusterConfig, ChannelLastLogInfoResp, ElectionOutcome, ElectionRequest,
    ReplicaWitness, NO_LEADER,
};

pub struct ElectionCoordinator {
    config: ElectionConfig,
    queue_tx: mpsc::Sender<ElectionRequest>,
    queue_rx: Mutex<Option<mpsc::Receiver<ElectionRequest>>>,
    shutdown_tx: broadcast::Sender<()>,
    pool: Arc<ElectionPool>,
    collector: Arc<WitnessCollector>,
    meter: Arc<dyn Meter>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl ElectionCoordinator {
    pub fn new(
        config: ElectionConfig,
        witness_store: Arc<dyn WitnessStore>,
        liveness: Arc<dyn NodeLiveness>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Result<Self> {
        config.validate().map_err(ElectionError::Config)?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_cap);
        let (shutdown_tx, _) = broadcast::channel(1);
        let collector = Arc::new(WitnessCollector::new(
            config.node_id,
            config.collect_timeout,
            witness_store,
            liveness,
            transport,
        ));
        Ok(Self {
            pool: Arc::new(ElectionPool::new(config.election_pool_size)),
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown_tx,
            collector,
            meter: Arc::new(NoopMeter),
            worker: Mutex::new(None),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = meter;
        self
    }

    /// Spawn the worker loop. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let Some(queue_rx) = self.queue_rx.lock().take() else {
            return;
        };
        let loop_ctx = LoopContext {
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            collector: Arc::clone(&self.collector),
            meter: Arc::clone(&self.meter),
            shutdown_tx: self.shutdown_tx.clone(),
        };
        *worker = Some(tokio::spawn(run_loop(queue_rx, loop_ctx)));
    }

    /// Stop the coordinator. In-flight rounds abort at their next delivery
    /// point; queued requests are dropped.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "election worker did not shut down cleanly");
            }
        }
        info!("election coordinator stopped");
    }

    /// Enqueue an election for the channel described by `config`.
    ///
    /// Fails fast: `QueueFull` when the queue is at capacity, `Stopped` when
    /// the coordinator is shutting down. On success the returned receiver
    /// yields exactly one outcome.
    pub fn request_election(
        &self,
        config: ChannelClusterConfig,
    ) -> Result<mpsc::Receiver<ElectionOutcome>> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(ElectionError::Stopped);
        }
        let (result_tx, result_rx) = mpsc::channel(1);
        let req = ElectionRequest {
            channel: config.channel_key(),
            config,
            result_tx,
        };
        match self.queue_tx.try_send(req) {
            Ok(()) => Ok(result_rx),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ElectionError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ElectionError::Stopped),
        }
    }

    /// Enqueue and await the outcome.
    pub async fn elect(&self, config: ChannelClusterConfig) -> Result<ChannelClusterConfig> {
        let mut result_rx = self.request_election(config)?;
        result_rx.recv().await.ok_or(ElectionError::Stopped)?
    }
}

struct LoopContext {
    config: ElectionConfig,
    pool: Arc<ElectionPool>,
    collector: Arc<WitnessCollector>,
    meter: Arc<dyn Meter>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Single worker loop: wait for a request, drain what else is immediately
/// available up to the batch cap, hand the batch to the pool.
async fn run_loop(mut queue_rx: mpsc::Receiver<ElectionRequest>, ctx: LoopContext) {
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            maybe_req = queue_rx.recv() => {
                let Some(first) = maybe_req else { break };
                let mut batch = vec![first];
                while batch.len() < ctx.config.max_batch_len {
                    match queue_rx.try_recv() {
                        Ok(req) => batch.push(req),
                        Err(_) => break,
                    }
                }
                dispatch_batch(batch, &ctx);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

fn dispatch_batch(batch: Vec<ElectionRequest>, ctx: &LoopContext) {
    let running = ctx.pool.running();
    if running >= ctx.pool.size().saturating_sub(1) {
        warn!(
            running,
            size = ctx.pool.size(),
            "channel election pool is busy"
        );
        ctx.meter
            .counter("wren_election_pool_saturated_total", &[])
            .inc(1);
        ctx.meter.emit(CoreEvent::Election(ElectionEvt {
            kind: ElectionKind::PoolSaturated {
                running,
                size: ctx.pool.size(),
            },
        }));
    }
    ctx.meter.emit(CoreEvent::Election(ElectionEvt {
        kind: ElectionKind::BatchDispatched { reqs: batch.len() },
    }));

    let round = RoundContext {
        quorum: ctx.config.quorum(),
        collector: Arc::clone(&ctx.collector),
        meter: Arc::clone(&ctx.meter),
        shutdown_rx: ctx.shutdown_tx.subscribe(),
    };
    if let Err(err) = ctx.pool.submit(run_election_round(batch, round)) {
        error!(error = %err, "submitting election batch failed");
    }
}

struct RoundContext {
    quorum: usize,
    collector: Arc<WitnessCollector>,
    meter: Arc<dyn Meter>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// One election round for a micro-batch.
async fn run_election_round(batch: Vec<ElectionRequest>, mut ctx: RoundContext) {
    let witnesses = match ctx.collector.collect(&batch).await {
        Ok(witnesses) => witnesses,
        Err(err) => {
            error!(error = %err, "witness collection failed");
            for req in batch {
                if deliver(&req, Err(err.clone()), &mut ctx.shutdown_rx)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            return;
        }
    };

    for req in batch {
        let channel_witnesses = witnesses_for_request(&req, &witnesses);
        let outcome = decide(&req, &channel_witnesses, ctx.quorum, &ctx.meter);
        if deliver(&req, outcome, &mut ctx.shutdown_rx).await.is_err() {
            return;
        }
    }
}

/// Witnesses matching the request's channel, gathered in the order of its
/// replica list so the leader tie-break is deterministic.
fn witnesses_for_request(
    req: &ElectionRequest,
    witnesses: &std::collections::HashMap<u64, Vec<ChannelLastLogInfoResp>>,
) -> Vec<ReplicaWitness> {
    let mut matched = Vec::with_capacity(req.config.replicas.len());
    for &replica_id in &req.config.replicas {
        let Some(resps) = witnesses.get(&replica_id) else {
            continue;
        };
        for resp in resps {
            if resp.channel_id == req.channel.channel_id
                && resp.channel_type == req.channel.channel_type
            {
                matched.push(ReplicaWitness {
                    replica_id,
                    log_index: resp.log_index,
                    term: resp.term,
                });
            }
        }
    }
    matched
}

fn decide(
    req: &ElectionRequest,
    channel_witnesses: &[ReplicaWitness],
    quorum: usize,
    meter: &Arc<dyn Meter>,
) -> ElectionOutcome {
    if channel_witnesses.len() < quorum {
        warn!(
            channel = %req.channel,
            have = channel_witnesses.len(),
            quorum,
            "not enough replicas for channel election"
        );
        meter.emit(CoreEvent::Election(ElectionEvt {
            kind: ElectionKind::QuorumFailed {
                have: channel_witnesses.len(),
                quorum,
            },
        }));
        return Err(ElectionError::NotEnoughReplicas {
            have: channel_witnesses.len(),
            quorum,
        });
    }

    let leader_id = choose_leader_by_log(channel_witnesses);
    if leader_id == NO_LEADER {
        return Err(ElectionError::NoLeader);
    }

    let mut config = req.config.clone();
    config.term += 1;
    config.leader_id = leader_id;
    meter.emit(CoreEvent::Election(ElectionEvt {
        kind: ElectionKind::LeaderElected {
            leader: leader_id,
            term: config.term,
        },
    }));
    Ok(config)
}

/// Choose the replica with the greatest `(term, log_index)`; ties keep the
/// first witness seen, which is the earliest entry in the request's replica
/// list.
pub(crate) fn choose_leader_by_log(witnesses: &[ReplicaWitness]) -> u64 {
    let mut leader_id = NO_LEADER;
    let mut max_term = 0u64;
    let mut max_index = 0u64;
    for witness in witnesses {
        if witness.term > max_term {
            max_term = witness.term;
            max_index = witness.log_index;
            leader_id = witness.replica_id;
        } else if witness.term == max_term && witness.log_index > max_index {
            max_index = witness.log_index;
            leader_id = witness.replica_id;
        }
    }
    leader_id
}

/// Hand the outcome to the requester, bounded by shutdown. A dropped
/// receiver is not an error; a shutdown aborts the round.
async fn deliver(
    req: &ElectionRequest,
    outcome: ElectionOutcome,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> std::result::Result<(), ()> {
    tokio::select! {
        sent = req.result_tx.send(outcome) => {
            let _ = sent;
            Ok(())
        }
        _ = shutdown_rx.recv() => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness(replica_id: u64, log_index: u64, term: u64) -> ReplicaWitness {
        ReplicaWitness {
            replica_id,
            log_index,
            term,
        }
    }

    #[test]
    fn test_choose_leader_highest_term_wins() {
        // Term dominates index.
        let chosen = choose_leader_by_log(&[
            witness(1, 5, 3),
            witness(2, 100, 2),
            witness(3, 50, 3),
        ]);
        assert_eq!(chosen, 3);
    }

    #[test]
    fn test_choose_leader_index_breaks_term_tie() {
        let chosen = choose_leader_by_log(&[witness(1, 10, 4), witness(2, 11, 4)]);
        assert_eq!(chosen, 2);
    }

    #[test]
    fn test_choose_leader_full_tie_keeps_first_seen() {
        let chosen = choose_leader_by_log(&[
            witness(10, 100, 7),
            witness(20, 100, 7),
            witness(30, 99, 7),
        ]);
        assert_eq!(chosen, 10);
    }

    #[test]
    fn test_choose_leader_all_empty_logs() {
        assert_eq!(choose_leader_by_log(&[]), NO_LEADER);
    }

    #[test]
    fn test_choose_leader_zero_term_nonzero_index() {
        // A replica with data at term 0 still beats truly empty peers.
        let chosen = choose_leader_by_log(&[witness(1, 0, 0), witness(2, 5, 0)]);
        assert_eq!(chosen, 2);
    }
}

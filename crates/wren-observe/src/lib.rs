//! wren-observe: vendor-neutral observability ABI.
//!
//! Core crates depend only on these traits and event types. Backends live elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: CoreEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: CoreEvent) {}
}

/// Typed events for live visualization (payloads and uids never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum CoreEvent {
    MsgLog(MsgLogEvt),
    Election(ElectionEvt),
}

#[derive(Clone, Debug)]
pub struct MsgLogEvt {
    pub shard: u32,
    pub kind: MsgLogKind,
}
#[derive(Clone, Debug)]
pub enum MsgLogKind {
    /// A single-channel append batch committed.
    Append { msgs: usize, ms: u32 },
    /// A cross-shard append fanned out.
    BatchAppend { shards: usize, msgs: usize },
    /// A channel log was truncated.
    Truncate { seq: u64 },
    /// A corrupt index or column key was skipped during a scan.
    CorruptKeySkipped,
}

#[derive(Clone, Debug)]
pub struct ElectionEvt {
    pub kind: ElectionKind,
}
#[derive(Clone, Debug)]
pub enum ElectionKind {
    /// A micro-batch of election requests was dispatched to the pool.
    BatchDispatched { reqs: usize },
    /// The election pool was at or near capacity when a batch arrived.
    PoolSaturated { running: usize, size: usize },
    /// A channel failed quorum.
    QuorumFailed { have: usize, quorum: usize },
    /// A leader was chosen for a channel.
    LeaderElected { leader: u64, term: u32 },
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
#[macro_export]
macro_rules! obs_hist {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.histo($name, &[], $labels).observe($v as f64);
    }};
}

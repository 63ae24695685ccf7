use super::ProgressSnapshot;
use crate::scheduler::{CompletionReport, Packet};

/// Observer of scheduler events
///
/// Every hook defaults to a no-op. Hooks are called with the scheduler
/// borrowed, so implementations must not call back into it.
pub trait StatsSink: Send + Sync {
    /// A packet was handed to `worker`
    fn on_packet_issued(&self, _worker: &str, _packet: &Packet) {}

    /// `worker` reported the completion of `packet`
    fn on_completion(&self, _worker: &str, _packet: &Packet, _report: &CompletionReport) {}

    /// Periodic progress tick
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    /// `worker` was declared dead; `returned` is the packet put back in the pool
    fn on_worker_dead(&self, _worker: &str, _returned: Option<&Packet>) {}
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatsSink;

impl StatsSink for NullStatsSink {}

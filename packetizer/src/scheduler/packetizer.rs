//! Packet scheduler
//!
//! The `Packetizer` owns the shard registry, the per-worker state and the
//! size controller. Workers drive it by calling [`Packetizer::get_next_packet`]
//! with the report of their previous packet; each call updates bookkeeping
//! from the report and answers with the next packet, `NoMoreWork` or `Retry`.
//!
//! ## Worker lifecycle
//!
//! ```text
//! Idle ──issue──► PacketIssued ──report──► Idle
//!   │                                        │
//!   └──── no shard left ──► Exhausted ◄──────┘
//!
//! any state ──mark_worker_dead──► Dead
//! ```
//!
//! A worker stays pinned to its shard while the shard has work. Pins outside
//! the worker's home host count against that host's `max_workers_per_host`.

use super::builder::{build_packet, target_size, worker_weight};
use super::packet::{CompletionReport, Packet, PacketReply};
use super::selector::{select, Selection};
use super::worker::{WorkerId, WorkerSpec, WorkerState, WorkerStatus};
use crate::config::{PacketizerConfig, SizeStrategy};
use crate::dataset::Element;
use crate::errors::{PacketizerError, Result};
use crate::registry::{EntryRange, ShardRegistry};
use crate::sizing::{controller_for, SizeController, SizingContext};
use crate::stats::{NullStatsSink, ProgressSnapshot, StatsSink};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Locality-aware packet scheduler
pub struct Packetizer {
    config: PacketizerConfig,
    registry: ShardRegistry,
    workers: FxHashMap<WorkerId, WorkerState>,
    /// Worker ids in announcement order
    worker_order: Vec<WorkerId>,
    sizer: Box<dyn SizeController>,
    sink: Arc<dyn StatsSink>,
    processed: u64,
    bytes_read: u64,
    packets_issued: u64,
    stopped: bool,
    started_at: Instant,
}

impl Packetizer {
    /// Build a scheduler over `elements` for the announced `workers`.
    ///
    /// Fails if the configuration is invalid, a worker id is announced twice
    /// or no element is valid.
    pub fn new(
        config: PacketizerConfig,
        elements: Vec<Element>,
        workers: Vec<WorkerSpec>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = ShardRegistry::new(elements, config.max_workers_per_host);
        if registry.valid_count() == 0 {
            return Err(PacketizerError::NoValidShards);
        }

        let mut states = FxHashMap::default();
        let mut worker_order = Vec::with_capacity(workers.len());
        for spec in workers {
            if states.contains_key(&spec.id) {
                return Err(PacketizerError::Config(format!(
                    "worker {} announced twice",
                    spec.id
                )));
            }
            let home = spec.host.as_deref().and_then(|h| registry.host_index(h));
            if spec.host.is_some() && home.is_none() {
                debug!(worker = %spec.id, host = ?spec.host, "Worker host owns no shards");
            }
            worker_order.push(spec.id.clone());
            states.insert(spec.id.clone(), WorkerState::new(spec.id, home));
        }

        let mut packetizer = Self {
            sizer: controller_for(&config),
            config,
            registry,
            workers: states,
            worker_order,
            sink: Arc::new(NullStatsSink),
            processed: 0,
            bytes_read: 0,
            packets_issued: 0,
            stopped: false,
            started_at: Instant::now(),
        };
        packetizer.recompute_size();

        info!(
            shards = packetizer.registry.valid_count(),
            invalid = packetizer.registry.invalid_count(),
            unsized = packetizer.registry.unsized_count(),
            hosts = packetizer.registry.hosts().len(),
            workers = packetizer.workers.len(),
            strategy = ?packetizer.sizer.strategy(),
            "Packetizer created"
        );

        Ok(packetizer)
    }

    /// Route scheduler events to `sink`
    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PacketizerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn worker(&self, id: &str) -> Option<&WorkerState> {
        self.workers.get(id)
    }

    /// Workers in announcement order
    pub fn workers(&self) -> impl Iterator<Item = &WorkerState> + '_ {
        self.worker_order
            .iter()
            .filter_map(move |id| self.workers.get(id))
    }

    pub fn size_strategy(&self) -> SizeStrategy {
        self.sizer.strategy()
    }

    /// Entries per packet before worker weighting
    pub fn base_packet_size(&self) -> u64 {
        self.config
            .fixed_packet_size
            .unwrap_or_else(|| self.sizer.base_packet_size())
    }

    /// Total entries to process, exact or estimated
    pub fn estimated_total(&self) -> Option<u64> {
        self.sizer.estimated_total()
    }

    /// Some shards were excluded from the run
    pub fn is_partially_invalid(&self) -> bool {
        self.registry.invalid_count() > 0
    }

    /// Static sizing cannot start until every shard size is known
    pub fn needs_validation(&self) -> bool {
        self.sizer.strategy() == SizeStrategy::Static && self.registry.unsized_count() > 0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stopped, or every live worker exhausted
    pub fn is_finished(&self) -> bool {
        self.stopped || self.workers.values().all(|w| w.status.is_terminal())
    }

    /// Make every later request answer `NoMoreWork`. Issued packets are not recalled.
    pub fn stop(&mut self) {
        if !self.stopped {
            info!(processed = self.processed, "Packetizer stopped");
        }
        self.stopped = true;
    }

    /// Dataset figures for the size controller
    pub fn sizing_context(&self) -> SizingContext {
        SizingContext {
            known_entries: self.registry.known_entries(),
            known_shards: self.registry.sized_count(),
            unknown_shards: self.registry.unsized_count(),
            num_workers: self.workers.len(),
        }
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            estimated_total: self.estimated_total(),
            processed: self.processed,
            bytes_read: self.bytes_read,
            packets_issued: self.packets_issued,
            unissued_entries: self.registry.unissued_entries(),
            returned_entries: self.registry.returned_entries(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Take a snapshot and hand it to the stats sink
    pub fn report_progress(&self) -> ProgressSnapshot {
        let snapshot = self.progress_snapshot();
        self.sink.on_progress(&snapshot);
        snapshot
    }

    /// Answer a worker's request for work.
    ///
    /// `report` describes the worker's previous packet. A request without a
    /// report while a packet is outstanding gets the same packet again.
    pub fn get_next_packet(
        &mut self,
        worker_id: &str,
        report: Option<CompletionReport>,
    ) -> Result<PacketReply> {
        let status = self.worker_state(worker_id)?.status;
        if status == WorkerStatus::Dead {
            return Err(PacketizerError::WorkerDead(worker_id.to_string()));
        }

        let has_report = report.is_some();
        if let Some(report) = report {
            self.apply_report(worker_id, report)?;
        }

        if self.stopped {
            self.retire_worker(worker_id)?;
            return Ok(PacketReply::NoMoreWork);
        }

        if status == WorkerStatus::Exhausted {
            return Ok(PacketReply::NoMoreWork);
        }

        if !has_report {
            if let Some(packet) = self.worker_state(worker_id)?.outstanding.clone() {
                debug!(worker = worker_id, path = %packet.path, "Re-issuing outstanding packet");
                return Ok(PacketReply::Packet(packet));
            }
        }

        if self.needs_validation() {
            return Err(PacketizerError::ValidationRequired);
        }

        self.assign(worker_id)
    }

    /// Declare a worker unreachable.
    ///
    /// Its outstanding packet goes back to its shard and is issued to another
    /// worker; its pin is released. Marking a dead worker again is a no-op.
    pub fn mark_worker_dead(&mut self, worker_id: &str) -> Result<()> {
        let worker = self.worker_state_mut(worker_id)?;
        if worker.status == WorkerStatus::Dead {
            return Ok(());
        }

        let outstanding = worker.outstanding.take();
        let cursor = worker.cursor.take();
        let counted = std::mem::take(&mut worker.counted);
        worker.status = WorkerStatus::Dead;

        if let Some(cursor) = cursor {
            if let Some(packet) = &outstanding {
                self.registry
                    .return_range(cursor, EntryRange::new(packet.first, packet.num));
            }
            self.registry.release(cursor, counted);
        }

        warn!(
            worker = worker_id,
            returned = outstanding.as_ref().map(|p| p.num).unwrap_or(0),
            "Worker marked dead"
        );
        self.sink.on_worker_dead(worker_id, outstanding.as_ref());

        let stranded = self.registry.returned_entries();
        if stranded > 0 && self.is_finished() {
            warn!(entries = stranded, "Returned ranges left with no live worker");
        }

        Ok(())
    }

    fn worker_state(&self, worker_id: &str) -> Result<&WorkerState> {
        self.workers
            .get(worker_id)
            .ok_or_else(|| PacketizerError::UnknownWorker(worker_id.to_string()))
    }

    fn worker_state_mut(&mut self, worker_id: &str) -> Result<&mut WorkerState> {
        self.workers
            .get_mut(worker_id)
            .ok_or_else(|| PacketizerError::UnknownWorker(worker_id.to_string()))
    }

    /// Fold a completion report into worker and run counters
    fn apply_report(&mut self, worker_id: &str, report: CompletionReport) -> Result<()> {
        let worker = self.worker_state_mut(worker_id)?;
        let Some(packet) = worker.outstanding.take() else {
            debug!(worker = worker_id, "Completion report without outstanding packet ignored");
            return Ok(());
        };

        let processed = report.entries_processed.min(packet.num);
        worker.processed += processed;
        worker.proc_time_secs += report.proc_time_secs.max(0.0);
        worker.status = WorkerStatus::Idle;
        let cursor = worker.cursor;

        self.processed += processed;
        self.bytes_read += report.bytes_read.unwrap_or(0);

        if packet.size_unknown {
            match cursor {
                Some(cursor) => self.learn_shard_size(cursor, &packet, &report, processed),
                None => warn!(worker = worker_id, "Probe report for unpinned worker"),
            }
        }

        debug!(
            worker = worker_id,
            path = %packet.path,
            first = packet.first,
            processed,
            "Packet completed"
        );
        self.sink.on_completion(worker_id, &packet, &report);

        Ok(())
    }

    /// Use a probe report to fill in a shard's entry count.
    ///
    /// Without an explicit total, a short probe means the shard ended inside
    /// the probed range.
    fn learn_shard_size(
        &mut self,
        cursor: usize,
        packet: &Packet,
        report: &CompletionReport,
        processed: u64,
    ) {
        let total = report
            .total_entries_in_shard
            .or_else(|| (processed < packet.num).then(|| packet.first + processed));

        let Some(count) = total else {
            if let Some(c) = self.registry.cursor_mut(cursor) {
                c.clear_size_pending();
            }
            self.registry.retire_if_exhausted(cursor);
            return;
        };

        let Some(element) = self.registry.element_mut(packet.element) else {
            warn!(element = packet.element, "Probe report for unknown element");
            return;
        };
        let newly_sized = !element.is_sized();
        let valid = element.set_entries(count);
        let end = element.end();
        let scheduled = element.len();

        if let Some(c) = self.registry.cursor_mut(cursor) {
            match end {
                Some(end) => c.set_end(end),
                None => c.clear_size_pending(),
            }
        }
        self.registry.retire_if_exhausted(cursor);

        if newly_sized {
            if let Some(len) = scheduled.filter(|_| valid) {
                self.sizer.record_shard_size(len);
            }
            self.recompute_size();
            debug!(path = %packet.path, entries = count, valid, "Shard size learned");
        }
    }

    fn recompute_size(&mut self) {
        let ctx = self.sizing_context();
        self.sizer.recompute(&ctx);
    }

    /// Pick the next packet for an idle worker
    fn assign(&mut self, worker_id: &str) -> Result<PacketReply> {
        let target = self.target_for(worker_id)?;
        let (pinned, home, counted) = {
            let worker = self.worker_state(worker_id)?;
            (worker.cursor, worker.home, worker.counted)
        };

        if let Some(cursor) = pinned {
            let has_work = self.registry.cursor(cursor).is_some_and(|c| c.has_work());
            if has_work {
                if let Some(packet) = build_packet(&mut self.registry, cursor, target) {
                    return self.issue(worker_id, packet);
                }
            }
            self.registry.release(cursor, counted);
            let worker = self.worker_state_mut(worker_id)?;
            worker.cursor = None;
            worker.counted = false;
        }

        match select(&mut self.registry, home) {
            Selection::Shard(cursor) => {
                let host = self
                    .registry
                    .cursor(cursor)
                    .map(|c| c.host())
                    .ok_or_else(|| PacketizerError::Internal("selected cursor missing".into()))?;
                let counted = home != Some(host);
                self.registry.attach(cursor, counted);

                let worker = self.worker_state_mut(worker_id)?;
                worker.cursor = Some(cursor);
                worker.counted = counted;
                debug!(
                    worker = worker_id,
                    cursor,
                    host = %self.registry.hosts()[host].name(),
                    counted,
                    "Worker pinned to shard"
                );

                let packet = build_packet(&mut self.registry, cursor, target).ok_or_else(|| {
                    PacketizerError::Internal("selected shard has nothing to issue".into())
                })?;
                self.issue(worker_id, packet)
            }
            Selection::Retry => {
                debug!(worker = worker_id, "Only size-pending shards left, retry later");
                Ok(PacketReply::Retry)
            }
            Selection::Exhausted => {
                self.worker_state_mut(worker_id)?.status = WorkerStatus::Exhausted;
                info!(worker = worker_id, "Worker exhausted");
                if self.is_finished() {
                    info!(
                        processed = self.processed,
                        packets = self.packets_issued,
                        "All workers exhausted"
                    );
                    let stranded = self.registry.returned_entries();
                    if stranded > 0 {
                        warn!(entries = stranded, "Returned ranges left with no live worker");
                    }
                }
                Ok(PacketReply::NoMoreWork)
            }
        }
    }

    /// Packet size for one worker, weighted by its measured throughput
    fn target_for(&self, worker_id: &str) -> Result<u64> {
        let base = self.base_packet_size();
        if !self.config.use_worker_weights {
            return Ok(base);
        }
        let worker = self.worker_state(worker_id)?;
        Ok(target_size(base, worker_weight(worker, self.workers())))
    }

    fn issue(&mut self, worker_id: &str, packet: Packet) -> Result<PacketReply> {
        let worker = self.worker_state_mut(worker_id)?;
        worker.outstanding = Some(packet.clone());
        worker.status = WorkerStatus::PacketIssued;
        worker.packets += 1;
        self.packets_issued += 1;

        debug!(
            worker = worker_id,
            path = %packet.path,
            first = packet.first,
            num = packet.num,
            probe = packet.size_unknown,
            "Packet issued"
        );
        self.sink.on_packet_issued(worker_id, &packet);

        Ok(PacketReply::Packet(packet))
    }

    /// Unpin a worker for good after a stop
    fn retire_worker(&mut self, worker_id: &str) -> Result<()> {
        let worker = self.worker_state_mut(worker_id)?;
        let cursor = worker.cursor.take();
        let counted = std::mem::take(&mut worker.counted);
        worker.status = WorkerStatus::Exhausted;

        if let Some(cursor) = cursor {
            self.registry.release(cursor, counted);
        }
        Ok(())
    }

    /// Registry access for the validation pass
    pub(crate) fn registry_mut(&mut self) -> &mut ShardRegistry {
        &mut self.registry
    }

    /// Whether any packet has been handed out yet
    pub(crate) fn dispatch_started(&self) -> bool {
        self.packets_issued > 0
    }

    /// Restore the unallocated state once every shard has a count
    pub(crate) fn finish_validation(&mut self) -> Result<()> {
        self.registry.reset();
        self.recompute_size();
        if self.registry.valid_count() == 0 {
            return Err(PacketizerError::NoValidShards);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Packetizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packetizer")
            .field("config", &self.config)
            .field("sizer", &self.sizer)
            .field("workers", &self.worker_order)
            .field("processed", &self.processed)
            .field("packets_issued", &self.packets_issued)
            .field("stopped", &self.stopped)
            .finish()
    }
}

//! Dispatch statistics tracking
//!
//! Counters shared between the scheduler and whoever drives it. All updates
//! are relaxed atomics, so the sink can be read while a run is in progress.

use super::{ProgressSnapshot, StatsSink};
use crate::scheduler::{CompletionReport, Packet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Statistics for packet dispatch
#[derive(Debug)]
pub struct DispatchStats {
    /// Packets handed out
    pub packets_issued: AtomicU64,

    /// Packets reported back as completed
    pub packets_completed: AtomicU64,

    /// Entries handed out in packets
    pub entries_issued: AtomicU64,

    /// Entries reported as processed
    pub entries_processed: AtomicU64,

    /// Bytes reported as read
    pub bytes_read: AtomicU64,

    /// Total processing time reported by workers in milliseconds
    pub total_proc_time_ms: AtomicU64,

    /// Workers declared dead
    pub workers_dead: AtomicU64,

    /// Entries put back in the pool by dead workers
    pub entries_returned: AtomicU64,

    /// Progress ticks observed
    pub progress_ticks: AtomicU64,

    /// Start time for uptime tracking
    pub start_time: Instant,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchStats {
    /// Create new dispatch statistics tracker
    pub fn new() -> Self {
        Self {
            packets_issued: AtomicU64::new(0),
            packets_completed: AtomicU64::new(0),
            entries_issued: AtomicU64::new(0),
            entries_processed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            total_proc_time_ms: AtomicU64::new(0),
            workers_dead: AtomicU64::new(0),
            entries_returned: AtomicU64::new(0),
            progress_ticks: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Get average entries per issued packet
    pub fn avg_packet_size(&self) -> f64 {
        let packets = self.packets_issued.load(Ordering::Relaxed);
        if packets == 0 {
            return 0.0;
        }
        self.entries_issued.load(Ordering::Relaxed) as f64 / packets as f64
    }

    /// Get entries processed per second of reported processing time
    pub fn entries_per_proc_second(&self) -> f64 {
        let total_time_s = self.total_proc_time_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        if total_time_s == 0.0 {
            return 0.0;
        }
        self.entries_processed.load(Ordering::Relaxed) as f64 / total_time_s
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Format uptime as human-readable string
    pub fn uptime_string(&self) -> String {
        let seconds = self.uptime_seconds();
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        let secs = seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, secs)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Log statistics summary
    pub fn print_summary(&self) {
        info!(
            packets_issued = self.packets_issued.load(Ordering::Relaxed),
            packets_completed = self.packets_completed.load(Ordering::Relaxed),
            entries_processed = self.entries_processed.load(Ordering::Relaxed),
            bytes_read = self.bytes_read.load(Ordering::Relaxed),
            workers_dead = self.workers_dead.load(Ordering::Relaxed),
            entries_returned = self.entries_returned.load(Ordering::Relaxed),
            avg_packet_size = format!("{:.1}", self.avg_packet_size()),
            entries_per_proc_second = format!("{:.1}", self.entries_per_proc_second()),
            uptime = %self.uptime_string(),
            "Dispatch statistics"
        );
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "packets_issued": self.packets_issued.load(Ordering::Relaxed),
            "packets_completed": self.packets_completed.load(Ordering::Relaxed),
            "entries_issued": self.entries_issued.load(Ordering::Relaxed),
            "entries_processed": self.entries_processed.load(Ordering::Relaxed),
            "bytes_read": self.bytes_read.load(Ordering::Relaxed),
            "total_proc_time_ms": self.total_proc_time_ms.load(Ordering::Relaxed),
            "workers_dead": self.workers_dead.load(Ordering::Relaxed),
            "entries_returned": self.entries_returned.load(Ordering::Relaxed),
            "avg_packet_size": self.avg_packet_size(),
            "entries_per_proc_second": self.entries_per_proc_second(),
            "uptime": self.uptime_string(),
        })
    }
}

impl StatsSink for DispatchStats {
    fn on_packet_issued(&self, _worker: &str, packet: &Packet) {
        self.packets_issued.fetch_add(1, Ordering::Relaxed);
        self.entries_issued.fetch_add(packet.num, Ordering::Relaxed);
    }

    fn on_completion(&self, _worker: &str, _packet: &Packet, report: &CompletionReport) {
        self.packets_completed.fetch_add(1, Ordering::Relaxed);
        self.entries_processed
            .fetch_add(report.entries_processed, Ordering::Relaxed);
        if let Some(bytes) = report.bytes_read {
            self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        }
        self.total_proc_time_ms.fetch_add(
            (report.proc_time_secs.max(0.0) * 1000.0) as u64,
            Ordering::Relaxed,
        );
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.progress_ticks.fetch_add(1, Ordering::Relaxed);
        info!(
            processed = snapshot.processed,
            estimated_total = ?snapshot.estimated_total,
            percent = snapshot
                .fraction()
                .map(|f| format!("{:.1}%", f * 100.0))
                .unwrap_or_else(|| "?".to_string()),
            packets = snapshot.packets_issued,
            returned = snapshot.returned_entries,
            rate = format!("{:.1}/s", snapshot.entries_per_second()),
            "Progress"
        );
    }

    fn on_worker_dead(&self, worker: &str, returned: Option<&Packet>) {
        self.workers_dead.fetch_add(1, Ordering::Relaxed);
        if let Some(packet) = returned {
            self.entries_returned.fetch_add(packet.num, Ordering::Relaxed);
            warn!(
                worker,
                path = %packet.path,
                first = packet.first,
                num = packet.num,
                "Packet returned to pool"
            );
        }
    }
}

//! Progress snapshots and the periodic reporter task

use crate::scheduler::SharedPacketizer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Point-in-time view of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Total entries to process, exact or estimated, once available
    pub estimated_total: Option<u64>,

    /// Entries reported as processed
    pub processed: u64,

    /// Bytes reported as read
    pub bytes_read: u64,

    /// Packets handed out so far
    pub packets_issued: u64,

    /// Entries not handed out yet, once every shard size is known
    pub unissued_entries: Option<u64>,

    /// Entries of packets lost with dead workers that are still waiting to be
    /// re-issued; non-zero after the run means the run is partial
    pub returned_entries: u64,

    /// Seconds since the scheduler was created
    pub elapsed_secs: f64,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0, 1]`, when a total is available
    pub fn fraction(&self) -> Option<f64> {
        match self.estimated_total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Entries processed per second of wall-clock time
    pub fn entries_per_second(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / self.elapsed_secs
    }
}

/// Spawn a task reporting progress every `interval` until the run finishes
pub fn spawn_progress_reporter(shared: SharedPacketizer, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let finished = shared
                .report_progress()
                .and_then(|_| shared.is_finished());
            match finished {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Progress reporting stopped");
                    break;
                }
            }
        }

        debug!("Progress reporter finished");
    })
}

//! Per-worker assignment state

use super::packet::Packet;
use serde::{Deserialize, Serialize};

/// Unique identifier of a worker
pub type WorkerId = String;

/// Worker as announced to the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: WorkerId,

    /// Host the worker runs on, used for locality
    pub host: Option<String>,
}

impl WorkerSpec {
    pub fn new(id: impl Into<WorkerId>, host: Option<&str>) -> Self {
        Self {
            id: id.into(),
            host: host.map(str::to_string),
        }
    }
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// Waiting for a packet (initial state)
    Idle,
    /// Holding an outstanding packet
    PacketIssued,
    /// No work left anywhere for this worker
    Exhausted,
    /// Reported unreachable by the transport
    Dead,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Exhausted | WorkerStatus::Dead)
    }
}

/// Scheduler-side state of one worker
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub(crate) id: WorkerId,
    pub(crate) home: Option<usize>,
    pub(crate) cursor: Option<usize>,
    /// Whether the current pin counts against its host's ceiling
    pub(crate) counted: bool,
    pub(crate) outstanding: Option<Packet>,
    pub(crate) status: WorkerStatus,
    pub(crate) processed: u64,
    pub(crate) proc_time_secs: f64,
    pub(crate) packets: u64,
}

impl WorkerState {
    pub(crate) fn new(id: WorkerId, home: Option<usize>) -> Self {
        Self {
            id,
            home,
            cursor: None,
            counted: false,
            outstanding: None,
            status: WorkerStatus::Idle,
            processed: 0,
            proc_time_secs: 0.0,
            packets: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Home host node index
    pub fn home(&self) -> Option<usize> {
        self.home
    }

    /// Cursor the worker is pinned to
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn outstanding(&self) -> Option<&Packet> {
        self.outstanding.as_ref()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Entries this worker reported as processed
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Packets issued to this worker
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Entries per processing second, once measured
    pub fn rate(&self) -> Option<f64> {
        if self.proc_time_secs <= 0.0 || self.processed == 0 {
            return None;
        }
        Some(self.processed as f64 / self.proc_time_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worker_is_idle() {
        let worker = WorkerState::new("w0".to_string(), Some(1));
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert_eq!(worker.home(), Some(1));
        assert!(worker.outstanding().is_none());
        assert_eq!(worker.rate(), None);
    }

    #[test]
    fn test_rate() {
        let mut worker = WorkerState::new("w0".to_string(), None);
        worker.processed = 500;
        worker.proc_time_secs = 2.0;
        assert_eq!(worker.rate(), Some(250.0));
    }

    #[test]
    fn test_terminal_states() {
        assert!(WorkerStatus::Dead.is_terminal());
        assert!(WorkerStatus::Exhausted.is_terminal());
        assert!(!WorkerStatus::PacketIssued.is_terminal());
    }
}

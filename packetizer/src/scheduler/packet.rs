//! Packets and completion reports exchanged with workers

use serde::{Deserialize, Serialize};

/// Unit of work handed to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Host holding the shard
    pub host: Option<String>,

    /// Index of the element in the dataset
    pub element: usize,

    /// Path or identifier of the shard
    pub path: String,

    /// First entry of the range
    pub first: u64,

    /// Number of entries in the range
    pub num: u64,

    /// Entry-list filter to apply
    pub entry_list: Option<String>,

    /// Shard size unknown: the worker processes what exists of the range
    /// and reports `total_entries_in_shard`
    pub size_unknown: bool,
}

impl Packet {
    /// One past the last entry of the range
    pub fn end(&self) -> u64 {
        self.first + self.num
    }
}

/// What a worker sends back with its next request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Wall-clock seconds between issue and report
    pub latency_secs: f64,

    /// Seconds spent processing the packet
    pub proc_time_secs: f64,

    /// CPU seconds spent processing the packet
    pub proc_cpu_secs: f64,

    /// Bytes read while processing
    pub bytes_read: Option<u64>,

    /// Total entries in the shard, when the worker just learned it
    pub total_entries_in_shard: Option<u64>,

    /// Entries actually processed
    pub entries_processed: u64,
}

impl CompletionReport {
    /// Report for a packet processed in full
    pub fn processed(entries: u64) -> Self {
        Self {
            entries_processed: entries,
            ..Default::default()
        }
    }

    pub fn with_proc_time(mut self, secs: f64) -> Self {
        self.proc_time_secs = secs;
        self.latency_secs = self.latency_secs.max(secs);
        self
    }

    pub fn with_shard_total(mut self, total: u64) -> Self {
        self.total_entries_in_shard = Some(total);
        self
    }

    pub fn with_bytes_read(mut self, bytes: u64) -> Self {
        self.bytes_read = Some(bytes);
        self
    }
}

/// Answer to `get_next_packet`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketReply {
    /// Process this range
    Packet(Packet),
    /// No work left for this worker
    NoMoreWork,
    /// Work may appear once a pending shard size is known, ask again
    Retry,
}

impl PacketReply {
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            PacketReply::Packet(packet) => Some(packet),
            _ => None,
        }
    }

    pub fn into_packet(self) -> Option<Packet> {
        match self {
            PacketReply::Packet(packet) => Some(packet),
            _ => None,
        }
    }

    pub fn is_no_more_work(&self) -> bool {
        matches!(self, PacketReply::NoMoreWork)
    }
}

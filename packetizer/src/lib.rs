//! Locality-aware dynamic packet scheduler for sharded datasets
//!
//! A [`Packetizer`] hands out contiguous entry ranges ("packets") of dataset
//! shards to a pool of workers on demand. Workers are kept on shards of
//! their own host where possible, the number of visiting workers per host is
//! capped, and packet sizes follow the dataset size, either computed once
//! from validated entry counts or re-estimated as shard sizes are learned.

pub mod config;
pub mod dataset;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod scheduler;
pub mod sizing;
pub mod stats;
pub mod validation;

pub use config::{PacketizerConfig, SizeStrategy};
pub use dataset::{DatasetDescription, Element, ElementSpec};
pub use errors::{PacketizerError, Result};
pub use registry::{EntryRange, HostNode, ShardCursor, ShardRegistry, NO_HOST};
pub use scheduler::{
    CompletionReport, Packet, PacketReply, Packetizer, SharedPacketizer, WorkerId, WorkerSpec,
    WorkerState, WorkerStatus,
};
pub use sizing::{SizeController, SizingContext};
pub use stats::{
    spawn_progress_reporter, DispatchStats, NullStatsSink, ProgressSnapshot, StatsSink,
};
pub use validation::{ShardCounter, ValidationSummary};

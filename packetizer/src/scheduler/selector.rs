//! Locality-aware shard selection

use crate::registry::ShardRegistry;

/// Outcome of looking for a shard for an idle worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Cursor to pin the worker to
    Shard(usize),
    /// Only shards waiting for their size remain in progress
    Retry,
    /// Nothing left for this worker
    Exhausted,
}

/// Pick the next shard for a worker with home host `home`.
///
/// Order: unallocated shard on the home host (uncapped), unallocated shard
/// on the least loaded host below the ceiling, shard already being drained
/// on a host below the ceiling.
pub(crate) fn select(registry: &mut ShardRegistry, home: Option<usize>) -> Selection {
    if let Some(cursor) = registry.next_unallocated(home) {
        return Selection::Shard(cursor);
    }

    if let Some(cursor) = registry.next_active(None) {
        return Selection::Shard(cursor);
    }

    if registry.has_pending_active() {
        return Selection::Retry;
    }

    Selection::Exhausted
}

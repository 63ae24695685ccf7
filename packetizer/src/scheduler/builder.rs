//! Packet construction

use super::packet::Packet;
use super::worker::WorkerState;
use crate::registry::ShardRegistry;

/// Bounds on the throughput weight of a single worker
const MIN_WEIGHT: f64 = 0.25;
const MAX_WEIGHT: f64 = 4.0;

/// Relative throughput of `worker` against the mean of all measured workers
pub(crate) fn worker_weight<'a>(
    worker: &WorkerState,
    workers: impl Iterator<Item = &'a WorkerState>,
) -> f64 {
    let Some(rate) = worker.rate() else {
        return 1.0;
    };

    let (sum, count) = workers
        .filter_map(WorkerState::rate)
        .fold((0.0, 0usize), |(sum, count), r| (sum + r, count + 1));
    if count == 0 || sum <= 0.0 {
        return 1.0;
    }

    (rate / (sum / count as f64)).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Entries to aim for in the next packet of a worker
pub(crate) fn target_size(base: u64, weight: f64) -> u64 {
    ((base as f64 * weight).round() as u64).max(1)
}

/// Cut the next packet from a cursor.
///
/// Retires the cursor from its host's active set when the packet drains it.
pub(crate) fn build_packet(
    registry: &mut ShardRegistry,
    cursor: usize,
    target: u64,
) -> Option<Packet> {
    let range = registry.cursor_mut(cursor)?.take(target)?;
    let (element_idx, size_unknown) = {
        let c = registry.cursor(cursor)?;
        (c.element(), c.end().is_none())
    };
    registry.retire_if_exhausted(cursor);

    let element = registry.element(element_idx)?;
    Some(Packet {
        host: element.host().map(str::to_string),
        element: element_idx,
        path: element.path().to_string(),
        first: range.first,
        num: range.num,
        entry_list: element.entry_list().map(str::to_string),
        size_unknown,
    })
}

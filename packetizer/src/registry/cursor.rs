//! Iteration state over one shard

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Contiguous entry range `[first, first + num)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRange {
    pub first: u64,
    pub num: u64,
}

impl EntryRange {
    pub fn new(first: u64, num: u64) -> Self {
        Self { first, num }
    }

    pub fn end(&self) -> u64 {
        self.first + self.num
    }
}

/// Cursor over the entries of one element.
///
/// `next_offset` only moves forward and `done` never reverts. Ranges handed
/// back by dead workers are queued in `returned` and issued before fresh
/// ranges, so the cursor offset itself is never rolled back.
#[derive(Debug, Clone)]
pub struct ShardCursor {
    element: usize,
    host: usize,
    next_offset: u64,
    end: Option<u64>,
    /// End of the requested range while the shard size is unknown
    limit: Option<u64>,
    done: bool,
    returned: VecDeque<EntryRange>,
    size_pending: bool,
}

impl ShardCursor {
    pub(crate) fn new(
        element: usize,
        host: usize,
        first: u64,
        end: Option<u64>,
        limit: Option<u64>,
    ) -> Self {
        Self {
            element,
            host,
            next_offset: first,
            end,
            limit: end.or(limit),
            done: matches!(end, Some(end) if end <= first),
            returned: VecDeque::new(),
            size_pending: false,
        }
    }

    /// Index of the element in the registry
    pub fn element(&self) -> usize {
        self.element
    }

    /// Index of the owning host node
    pub fn host(&self) -> usize {
        self.host
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// One past the last entry, if the shard size is known
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// All fresh entries have been issued
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// A probe packet carrying the shard size is outstanding
    pub fn is_size_pending(&self) -> bool {
        self.size_pending
    }

    /// Nothing left to issue, now or later
    pub fn is_exhausted(&self) -> bool {
        self.done && self.returned.is_empty()
    }

    /// Whether a packet can be issued from this cursor right now
    pub fn has_work(&self) -> bool {
        if !self.returned.is_empty() {
            return true;
        }
        match self.end {
            Some(end) => !self.done && self.next_offset < end,
            None => !self.done && !self.size_pending,
        }
    }

    /// Entries not yet issued, including returned ranges
    pub fn remaining(&self) -> Option<u64> {
        let returned = self.returned_entries();
        self.end
            .map(|end| end.saturating_sub(self.next_offset) + returned)
    }

    /// Entries waiting in ranges handed back by dead workers
    pub fn returned_entries(&self) -> u64 {
        self.returned.iter().map(|r| r.num).sum()
    }

    /// Take the next range of at most `target` entries.
    ///
    /// Returned ranges go first. For a sized shard, a take that would leave
    /// fewer than `target` entries behind takes the whole remainder instead.
    /// For an unsized shard the range is a probe and the cursor waits for the
    /// size before anyone else may draw from it.
    pub(crate) fn take(&mut self, target: u64) -> Option<EntryRange> {
        let target = target.max(1);

        if let Some(range) = self.returned.pop_front() {
            let issued = if range.num > target {
                self.returned.push_front(EntryRange::new(
                    range.first + target,
                    range.num - target,
                ));
                EntryRange::new(range.first, target)
            } else {
                range
            };
            if self.end.is_none() {
                self.size_pending = true;
            }
            return Some(issued);
        }

        match self.end {
            Some(end) => {
                if self.done || self.next_offset >= end {
                    self.done = true;
                    return None;
                }
                let remaining = end - self.next_offset;
                let mut num = target.min(remaining);
                if remaining - num < num {
                    num = remaining;
                }
                let range = EntryRange::new(self.next_offset, num);
                self.next_offset += num;
                if self.next_offset >= end {
                    self.done = true;
                }
                Some(range)
            }
            None => {
                if self.done || self.size_pending {
                    return None;
                }
                let num = match self.limit {
                    Some(limit) => target.min(limit.saturating_sub(self.next_offset)),
                    None => target,
                };
                if num == 0 {
                    self.done = true;
                    return None;
                }
                let range = EntryRange::new(self.next_offset, num);
                self.next_offset += num;
                self.size_pending = true;
                Some(range)
            }
        }
    }

    /// Queue a range a dead worker never completed
    pub(crate) fn give_back(&mut self, range: EntryRange) {
        if self.end.is_none() {
            self.size_pending = false;
        }
        self.returned.push_back(range);
    }

    /// Probe completed without revealing the size.
    ///
    /// A probe that reached the end of the requested range leaves nothing
    /// to issue even though the shard size stays unknown.
    pub(crate) fn clear_size_pending(&mut self) {
        self.size_pending = false;
        if matches!(self.limit, Some(limit) if self.end.is_none() && self.next_offset >= limit) {
            self.done = true;
        }
    }

    /// Record the shard end once its size is known.
    ///
    /// A probe may have overshot the real end; the offset stays where it is
    /// and the cursor is simply done. Returned ranges are trimmed to the end.
    pub(crate) fn set_end(&mut self, end: u64) {
        if self.end.is_some() {
            return;
        }
        self.end = Some(end);
        self.limit = Some(end);
        self.size_pending = false;
        if self.next_offset >= end {
            self.done = true;
        }
        self.returned.retain_mut(|range| {
            if range.first >= end {
                return false;
            }
            range.num = range.num.min(end - range.first);
            true
        });
    }
}

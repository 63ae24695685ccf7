//! Per-host bookkeeping

use std::collections::BTreeSet;

/// Name of the node grouping shards with no known host
pub const NO_HOST: &str = "<no-host>";

/// Shards owned by one source host
#[derive(Debug, Clone)]
pub struct HostNode {
    /// Host name
    name: String,

    /// Cursor indices in insertion order
    cursors: Vec<usize>,

    /// Position of the first never-started cursor in `cursors`
    next_unstarted: usize,

    /// Cursors currently being drained, ordered by cursor index
    active: BTreeSet<usize>,

    /// Workers pinned here that count against the ceiling
    active_workers: usize,
}

impl HostNode {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cursors: Vec::new(),
            next_unstarted: 0,
            active: BTreeSet::new(),
            active_workers: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_no_host(&self) -> bool {
        self.name == NO_HOST
    }

    /// Number of shards owned by this host
    pub fn shard_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    /// Whether any shard was never started
    pub fn has_unallocated(&self) -> bool {
        self.next_unstarted < self.cursors.len()
    }

    pub fn unallocated_count(&self) -> usize {
        self.cursors.len() - self.next_unstarted
    }

    /// Cursors currently being drained
    pub fn active_cursors(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.iter().copied()
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub(crate) fn push_cursor(&mut self, cursor: usize) {
        self.cursors.push(cursor);
    }

    pub(crate) fn take_unallocated(&mut self) -> Option<usize> {
        let cursor = self.cursors.get(self.next_unstarted).copied()?;
        self.next_unstarted += 1;
        Some(cursor)
    }

    pub(crate) fn activate(&mut self, cursor: usize) -> bool {
        self.active.insert(cursor)
    }

    pub(crate) fn deactivate(&mut self, cursor: usize) -> bool {
        self.active.remove(&cursor)
    }

    pub(crate) fn increment_workers(&mut self) {
        self.active_workers += 1;
    }

    pub(crate) fn decrement_workers(&mut self) {
        self.active_workers = self.active_workers.saturating_sub(1);
    }

    /// Forget all allocation state, keeping the owned cursor list
    pub(crate) fn reset(&mut self, cursors: Vec<usize>) {
        self.cursors = cursors;
        self.next_unstarted = 0;
        self.active.clear();
        self.active_workers = 0;
    }
}

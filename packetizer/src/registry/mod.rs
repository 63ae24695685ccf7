//! Shard registry
//!
//! The registry owns every element of the dataset together with the derived
//! per-host grouping. Host nodes and shard cursors live in arenas addressed
//! by stable indices; worker state refers to them by index only.
//!
//! ## Selection order
//!
//! ```text
//! preferred host ──► hosts by (active workers, insertion order) ──► none
//!   (uncapped)         skipping hosts at max_workers_per_host
//! ```
//!
//! The load order is an ordered index updated on every worker pin/unpin, so
//! iterating it is equivalent to a stable sort by current load.

mod cursor;
mod host;

pub use cursor::{EntryRange, ShardCursor};
pub use host::{HostNode, NO_HOST};

use crate::dataset::Element;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Registry of dataset shards grouped by host
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    /// Elements in dataset order
    elements: Vec<Element>,

    /// One cursor per valid element
    cursors: Vec<ShardCursor>,

    /// Host nodes in order of first appearance
    hosts: Vec<HostNode>,

    /// Host name to node index
    host_index: FxHashMap<String, usize>,

    /// (active workers, host index), ascending
    load_order: BTreeSet<(usize, usize)>,

    /// Hosts with at least one shard being drained
    active_hosts: BTreeSet<usize>,

    /// Ceiling on counted workers per host
    max_workers_per_host: usize,
}

impl ShardRegistry {
    /// Group elements by host and expose every valid one as unallocated
    pub fn new(elements: Vec<Element>, max_workers_per_host: usize) -> Self {
        let mut hosts = Vec::new();
        let mut host_index = FxHashMap::default();

        for element in &elements {
            let name = element.host().unwrap_or(NO_HOST);
            if !host_index.contains_key(name) {
                host_index.insert(name.to_string(), hosts.len());
                hosts.push(HostNode::new(name));
            }
        }

        let mut registry = Self {
            elements,
            cursors: Vec::new(),
            hosts,
            host_index,
            load_order: BTreeSet::new(),
            active_hosts: BTreeSet::new(),
            max_workers_per_host,
        };
        registry.reset();

        info!(
            elements = registry.elements.len(),
            valid = registry.valid_count(),
            hosts = registry.hosts.len(),
            "Shard registry built"
        );
        registry
    }

    /// Restore the initial unallocated state.
    ///
    /// Cursors are rebuilt from the currently valid elements, active sets and
    /// worker counts are cleared.
    pub fn reset(&mut self) {
        self.cursors.clear();
        let mut owned: Vec<Vec<usize>> = vec![Vec::new(); self.hosts.len()];

        for (idx, element) in self.elements.iter().enumerate() {
            if !element.is_valid() {
                continue;
            }
            let host = self.host_index[element.host().unwrap_or(NO_HOST)];
            owned[host].push(self.cursors.len());
            let limit = element.num().map(|num| element.first() + num);
            self.cursors.push(ShardCursor::new(
                idx,
                host,
                element.first(),
                element.end(),
                limit,
            ));
        }

        for (node, cursors) in self.hosts.iter_mut().zip(owned) {
            node.reset(cursors);
        }

        self.load_order = (0..self.hosts.len()).map(|h| (0, h)).collect();
        self.active_hosts.clear();

        debug!(cursors = self.cursors.len(), "Shard registry reset");
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, idx: usize) -> Option<&Element> {
        self.elements.get(idx)
    }

    pub(crate) fn element_mut(&mut self, idx: usize) -> Option<&mut Element> {
        self.elements.get_mut(idx)
    }

    pub fn cursors(&self) -> &[ShardCursor] {
        &self.cursors
    }

    pub fn cursor(&self, idx: usize) -> Option<&ShardCursor> {
        self.cursors.get(idx)
    }

    pub(crate) fn cursor_mut(&mut self, idx: usize) -> Option<&mut ShardCursor> {
        self.cursors.get_mut(idx)
    }

    pub fn hosts(&self) -> &[HostNode] {
        &self.hosts
    }

    pub fn host(&self, idx: usize) -> Option<&HostNode> {
        self.hosts.get(idx)
    }

    /// Node index for a host name
    pub fn host_index(&self, name: &str) -> Option<usize> {
        self.host_index.get(name).copied()
    }

    pub fn max_workers_per_host(&self) -> usize {
        self.max_workers_per_host
    }

    pub fn valid_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.elements.len() - self.valid_count()
    }

    /// Valid elements whose entry count is still unknown
    pub fn unsized_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.is_valid() && !e.is_sized())
            .count()
    }

    /// Valid elements whose entry count is known
    pub fn sized_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.is_valid() && e.is_sized())
            .count()
    }

    /// Entries to process across all valid, sized elements
    pub fn known_entries(&self) -> u64 {
        self.elements.iter().filter_map(|e| e.len()).sum()
    }

    /// Entries not yet issued across all cursors, if every size is known
    pub fn unissued_entries(&self) -> Option<u64> {
        self.cursors.iter().map(|c| c.remaining()).sum()
    }

    /// Entries handed back by dead workers and not yet re-issued
    pub fn returned_entries(&self) -> u64 {
        self.cursors.iter().map(|c| c.returned_entries()).sum()
    }

    /// Hosts that currently have shards being drained
    pub fn active_host_count(&self) -> usize {
        self.active_hosts.len()
    }

    /// Hosts below the ceiling, least loaded first
    fn hosts_below_ceiling(&self) -> impl Iterator<Item = usize> + '_ {
        let ceiling = self.max_workers_per_host;
        self.load_order
            .iter()
            .take_while(move |&&(load, _)| load < ceiling)
            .map(|&(_, host)| host)
    }

    /// Next never-started cursor.
    ///
    /// The preferred host is tried first regardless of its load; otherwise
    /// the least loaded host below the ceiling with unallocated shards wins.
    pub fn next_unallocated(&mut self, preferred: Option<usize>) -> Option<usize> {
        if let Some(host) = preferred {
            if let Some(cursor) = self.hosts.get_mut(host).and_then(|h| h.take_unallocated()) {
                return Some(cursor);
            }
        }

        let host = self
            .hosts_below_ceiling()
            .find(|&h| self.hosts[h].has_unallocated())?;
        self.hosts[host].take_unallocated()
    }

    /// Next in-progress cursor that can issue a packet, same preference order
    pub fn next_active(&self, preferred: Option<usize>) -> Option<usize> {
        if let Some(host) = preferred {
            if let Some(cursor) = self.first_ready_active(host) {
                return Some(cursor);
            }
        }

        self.hosts_below_ceiling()
            .filter(|h| self.active_hosts.contains(h))
            .find_map(|h| self.first_ready_active(h))
    }

    fn first_ready_active(&self, host: usize) -> Option<usize> {
        self.hosts
            .get(host)?
            .active_cursors()
            .find(|&c| self.cursors[c].has_work())
    }

    /// Whether an active shard is waiting for its size to be reported
    pub fn has_pending_active(&self) -> bool {
        self.active_hosts.iter().any(|&h| {
            self.hosts[h]
                .active_cursors()
                .any(|c| self.cursors[c].is_size_pending())
        })
    }

    /// Pin a worker to a cursor's host and mark the cursor active
    pub(crate) fn attach(&mut self, cursor: usize, counted: bool) {
        let host = self.cursors[cursor].host();
        if counted {
            self.adjust_workers(host, true);
        }
        self.hosts[host].activate(cursor);
        self.active_hosts.insert(host);
    }

    /// Unpin a worker from a cursor
    pub(crate) fn release(&mut self, cursor: usize, counted: bool) {
        let host = self.cursors[cursor].host();
        if counted {
            self.adjust_workers(host, false);
        }
        self.retire_if_exhausted(cursor);
    }

    /// Drop an exhausted cursor from its host's active set
    pub(crate) fn retire_if_exhausted(&mut self, cursor: usize) {
        if !self.cursors[cursor].is_exhausted() {
            return;
        }
        let host = self.cursors[cursor].host();
        if self.hosts[host].deactivate(cursor) {
            debug!(cursor, host = %self.hosts[host].name(), "Shard exhausted");
        }
        if !self.hosts[host].has_active() {
            self.active_hosts.remove(&host);
        }
    }

    /// Hand an unfinished range back to its cursor
    pub(crate) fn return_range(&mut self, cursor: usize, range: EntryRange) {
        let host = self.cursors[cursor].host();
        self.cursors[cursor].give_back(range);
        self.hosts[host].activate(cursor);
        self.active_hosts.insert(host);
    }

    fn adjust_workers(&mut self, host: usize, increment: bool) {
        let node = &mut self.hosts[host];
        self.load_order.remove(&(node.active_workers(), host));
        if increment {
            node.increment_workers();
        } else {
            node.decrement_workers();
        }
        self.load_order.insert((node.active_workers(), host));
    }
}

//! Shard validation pass
//!
//! Static sizing needs the entry count of every shard before the first
//! packet goes out. The pass fans out one `count_entries` request per idle
//! worker, choosing shards with the same locality rules as dispatch (home
//! host first, per-host ceiling respected), and hands a worker its next
//! shard as soon as its previous answer arrives.
//!
//! ```text
//! idle workers ──select──► count_entries ──► FuturesUnordered
//!      ▲                                          │
//!      └──────────── answer: set count ◄──────────┘
//! ```
//!
//! Once every shard has a count or is invalid, the registry is reset and
//! dispatch can start.

use crate::dataset::Element;
use crate::errors::{PacketizerError, Result};
use crate::registry::ShardRegistry;
use crate::scheduler::{Packetizer, WorkerId, WorkerStatus};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Counts the entries of a shard on behalf of a worker
#[async_trait]
pub trait ShardCounter: Send + Sync {
    /// Total entries in `element`, asked of `worker`
    async fn count_entries(&self, worker: &str, element: &Element) -> Result<u64>;
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// `count_entries` requests sent
    pub requested: usize,

    /// Shards that received a usable count
    pub counted: usize,

    /// Shards invalidated by their count
    pub invalidated: usize,

    /// Shards invalidated because the request failed
    pub failed: usize,
}

impl ValidationSummary {
    /// Whether the pass excluded any shard
    pub fn has_invalid(&self) -> bool {
        self.invalidated + self.failed > 0
    }
}

/// Next unallocated shard of unknown size for a worker with home `home`
fn next_unsized(registry: &mut ShardRegistry, home: Option<usize>) -> Option<(usize, bool)> {
    loop {
        let cursor = registry.next_unallocated(home)?;
        let (element, host) = {
            let c = registry.cursor(cursor)?;
            (c.element(), c.host())
        };
        if registry.element(element).is_some_and(|e| e.is_sized()) {
            continue;
        }
        let counted = home != Some(host);
        registry.attach(cursor, counted);
        return Some((cursor, counted));
    }
}

impl Packetizer {
    /// Fill in every unknown entry count through `counter`.
    ///
    /// Running the pass on a fully sized dataset is a no-op. A failed
    /// request invalidates its shard. Fails with `NoValidShards` when no
    /// valid shard remains.
    pub async fn validate(&mut self, counter: &dyn ShardCounter) -> Result<ValidationSummary> {
        let mut summary = ValidationSummary::default();
        if self.registry().unsized_count() == 0 {
            debug!("All shard sizes known, validation skipped");
            return Ok(summary);
        }

        if self.dispatch_started() {
            return Err(PacketizerError::Internal(
                "validation must run before dispatch".to_string(),
            ));
        }

        let mut idle: VecDeque<(WorkerId, Option<usize>)> = self
            .workers()
            .filter(|w| w.status() != WorkerStatus::Dead)
            .map(|w| (w.id().to_string(), w.home()))
            .collect();
        if idle.is_empty() {
            return Err(PacketizerError::Config(
                "validation needs at least one live worker".to_string(),
            ));
        }

        info!(
            shards = self.registry().unsized_count(),
            workers = idle.len(),
            "Starting validation pass"
        );

        let mut parked = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Some((worker, home)) = idle.pop_front() {
                let Some((cursor, counted)) = next_unsized(self.registry_mut(), home) else {
                    parked.push((worker, home));
                    continue;
                };
                let element = self
                    .registry()
                    .cursor(cursor)
                    .and_then(|c| self.registry().element(c.element()))
                    .cloned()
                    .ok_or_else(|| PacketizerError::Internal("cursor without element".into()))?;

                debug!(worker = %worker, path = %element.path(), "Requesting entry count");
                summary.requested += 1;
                in_flight.push(async move {
                    let result = counter.count_entries(&worker, &element).await;
                    (worker, home, cursor, counted, result)
                });
            }

            let Some((worker, home, cursor, counted, result)) = in_flight.next().await else {
                break;
            };

            let registry = self.registry_mut();
            let element_idx = registry
                .cursor(cursor)
                .map(|c| c.element())
                .ok_or_else(|| PacketizerError::Internal("cursor vanished".into()))?;
            let element = registry
                .element_mut(element_idx)
                .ok_or_else(|| PacketizerError::Internal("element vanished".into()))?;

            match result {
                Ok(count) => {
                    if element.set_entries(count) {
                        summary.counted += 1;
                    } else {
                        summary.invalidated += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        worker = %worker,
                        path = %element.path(),
                        error = %e,
                        "Entry count failed"
                    );
                    element.invalidate(e.to_string());
                    summary.failed += 1;
                }
            }
            registry.release(cursor, counted);

            // freed capacity may unblock parked workers
            idle.push_back((worker, home));
            idle.extend(parked.drain(..));
        }

        self.finish_validation()?;

        info!(
            requested = summary.requested,
            counted = summary.counted,
            invalidated = summary.invalidated,
            failed = summary.failed,
            total = ?self.estimated_total(),
            packet_size = self.base_packet_size(),
            "Validation pass complete"
        );

        Ok(summary)
    }
}

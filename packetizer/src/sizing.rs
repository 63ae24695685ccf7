//! Packet size control
//!
//! Both strategies aim at roughly `F` packets per worker over the whole run:
//! `base = max(1, total / (F * workers))`. They differ in how `total` is
//! obtained.
//!
//! - [`StaticSizeController`] waits for the exact total (all entry counts
//!   known, usually after the validation pass) and computes the size once.
//! - [`ProgressiveSizeController`] keeps a window of recently measured shard
//!   sizes and extrapolates the total over the shards not yet measured.

use crate::config::{PacketizerConfig, SizeStrategy};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::debug;

/// Dataset-wide figures the controllers derive their estimate from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizingContext {
    /// Entries to process over all shards whose size is known
    pub known_entries: u64,

    /// Valid shards whose size is known
    pub known_shards: usize,

    /// Valid shards whose size is still unknown
    pub unknown_shards: usize,

    /// Workers sharing the dataset
    pub num_workers: usize,
}

/// Strategy computing the base packet size
pub trait SizeController: Send + std::fmt::Debug {
    fn strategy(&self) -> SizeStrategy;

    /// A shard's true size just became known
    fn record_shard_size(&mut self, entries: u64);

    /// Recompute the estimate from the current dataset figures
    fn recompute(&mut self, ctx: &SizingContext);

    /// Entries per packet before worker weighting
    fn base_packet_size(&self) -> u64;

    /// Estimated total entries, if one is available yet
    fn estimated_total(&self) -> Option<u64>;
}

/// Build the controller selected by the configuration
pub fn controller_for(config: &PacketizerConfig) -> Box<dyn SizeController> {
    match config.strategy {
        SizeStrategy::Static => Box::new(StaticSizeController::new(config.packet_fraction_divisor)),
        SizeStrategy::Progressive => Box::new(ProgressiveSizeController::new(
            config.packet_fraction_divisor,
            config.recent_shard_window,
            config.initial_packet_size,
        )),
    }
}

fn packet_size_for(total: u64, divisor: u64, num_workers: usize) -> u64 {
    if num_workers == 0 {
        return 1;
    }
    let slots = divisor.saturating_mul(num_workers as u64).max(1);
    (total / slots).max(1)
}

/// Computes the packet size once the exact total is known
#[derive(Debug, Clone)]
pub struct StaticSizeController {
    divisor: u64,
    total: Option<u64>,
    packet_size: u64,
}

impl StaticSizeController {
    pub fn new(divisor: u64) -> Self {
        Self {
            divisor,
            total: None,
            packet_size: 1,
        }
    }
}

impl SizeController for StaticSizeController {
    fn strategy(&self) -> SizeStrategy {
        SizeStrategy::Static
    }

    fn record_shard_size(&mut self, _entries: u64) {}

    fn recompute(&mut self, ctx: &SizingContext) {
        if ctx.unknown_shards > 0 {
            return;
        }
        self.total = Some(ctx.known_entries);
        self.packet_size = packet_size_for(ctx.known_entries, self.divisor, ctx.num_workers);
        debug!(
            total = ctx.known_entries,
            packet_size = self.packet_size,
            "Static packet size computed"
        );
    }

    fn base_packet_size(&self) -> u64 {
        self.packet_size
    }

    fn estimated_total(&self) -> Option<u64> {
        self.total
    }
}

/// Re-estimates total and packet size from a moving window of shard sizes
pub struct ProgressiveSizeController {
    divisor: u64,
    recent: HeapRb<u64>,
    initial_packet_size: u64,
    estimate: Option<u64>,
    packet_size: u64,
}

impl ProgressiveSizeController {
    pub fn new(divisor: u64, window: usize, initial_packet_size: u64) -> Self {
        Self {
            divisor,
            recent: HeapRb::new(window.max(1)),
            initial_packet_size: initial_packet_size.max(1),
            estimate: None,
            packet_size: initial_packet_size.max(1),
        }
    }

    /// Mean of the shard sizes in the window
    pub fn recent_mean(&self) -> Option<f64> {
        let count = self.recent.occupied_len();
        if count == 0 {
            return None;
        }
        let sum: u64 = self.recent.iter().sum();
        Some(sum as f64 / count as f64)
    }
}

impl std::fmt::Debug for ProgressiveSizeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveSizeController")
            .field("divisor", &self.divisor)
            .field("recent", &self.recent.iter().collect::<Vec<_>>())
            .field("estimate", &self.estimate)
            .field("packet_size", &self.packet_size)
            .finish()
    }
}

impl SizeController for ProgressiveSizeController {
    fn strategy(&self) -> SizeStrategy {
        SizeStrategy::Progressive
    }

    fn record_shard_size(&mut self, entries: u64) {
        let _ = self.recent.push_overwrite(entries);
    }

    fn recompute(&mut self, ctx: &SizingContext) {
        self.estimate = if ctx.unknown_shards == 0 {
            Some(ctx.known_entries)
        } else {
            self.recent_mean().map(|mean| {
                ctx.known_entries + (mean * ctx.unknown_shards as f64).round() as u64
            })
        };

        self.packet_size = match self.estimate {
            Some(total) => packet_size_for(total, self.divisor, ctx.num_workers),
            None => self.initial_packet_size,
        };

        debug!(
            estimate = ?self.estimate,
            packet_size = self.packet_size,
            known_shards = ctx.known_shards,
            unknown_shards = ctx.unknown_shards,
            "Progressive packet size recomputed"
        );
    }

    fn base_packet_size(&self) -> u64 {
        self.packet_size
    }

    fn estimated_total(&self) -> Option<u64> {
        self.estimate
    }
}

//! Dispatch statistics and progress reporting
//!
//! The scheduler reports through an injected [`StatsSink`]; nothing in the
//! core writes to global state.

mod dispatch;
mod progress;
mod sink;

pub use dispatch::DispatchStats;
pub use progress::{spawn_progress_reporter, ProgressSnapshot};
pub use sink::{NullStatsSink, StatsSink};

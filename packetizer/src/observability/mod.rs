//! Logging setup shared by the binaries driving the scheduler

mod logging;

pub use logging::{default_log_dir, init_production_logging, init_simple_logging, LogFormat};

//! Scheduler configuration
//!
//! `PacketizerConfig` is embedded as the `[packetizer]` table of a
//! coordinator config file, but can also be loaded on its own.

use crate::errors::{PacketizerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Packet size control strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeStrategy {
    /// Packet size derived once from the validated total entry count
    Static,
    /// Packet size re-estimated from a moving window of observed shard sizes
    Progressive,
}

/// Tunables for the packet scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketizerConfig {
    /// Ceiling on non-home workers pinned to one host
    pub max_workers_per_host: usize,

    /// Divisor F in `total / (F * workers)`
    pub packet_fraction_divisor: u64,

    /// Fixed packet size, bypasses the size controller when set
    pub fixed_packet_size: Option<u64>,

    /// Number of recent shard sizes averaged by the progressive controller
    pub recent_shard_window: usize,

    /// Packet size used before any shard size is known (progressive)
    pub initial_packet_size: u64,

    /// Size control strategy
    pub strategy: SizeStrategy,

    /// Scale packets by each worker's measured throughput
    pub use_worker_weights: bool,

    /// Progress reporting period in milliseconds
    pub progress_interval_ms: u64,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            max_workers_per_host: 4,
            packet_fraction_divisor: 20,
            fixed_packet_size: None,
            recent_shard_window: 8,
            initial_packet_size: 100,
            strategy: SizeStrategy::Static,
            use_worker_weights: false,
            progress_interval_ms: 1000,
        }
    }
}

impl PacketizerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading packetizer configuration");

        let content = std::fs::read_to_string(path)?;
        let config: PacketizerConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_workers_per_host == 0 {
            return Err(PacketizerError::Config(
                "max_workers_per_host must be at least 1".into(),
            ));
        }

        if self.packet_fraction_divisor == 0 {
            return Err(PacketizerError::Config(
                "packet_fraction_divisor must be at least 1".into(),
            ));
        }

        if self.fixed_packet_size == Some(0) {
            return Err(PacketizerError::Config(
                "fixed_packet_size must be at least 1 when set".into(),
            ));
        }

        if self.recent_shard_window == 0 || self.recent_shard_window > 1024 {
            return Err(PacketizerError::Config(
                "recent_shard_window must be between 1 and 1024".into(),
            ));
        }

        if self.initial_packet_size == 0 {
            return Err(PacketizerError::Config(
                "initial_packet_size must be at least 1".into(),
            ));
        }

        if self.progress_interval_ms == 0 {
            return Err(PacketizerError::Config(
                "progress_interval_ms must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PacketizerConfig::default();

        assert_eq!(config.max_workers_per_host, 4);
        assert_eq!(config.packet_fraction_divisor, 20);
        assert_eq!(config.fixed_packet_size, None);
        assert_eq!(config.recent_shard_window, 8);
        assert_eq!(config.strategy, SizeStrategy::Static);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = PacketizerConfig::default();
        config.max_workers_per_host = 0;
        assert!(config.validate().is_err());

        let mut config = PacketizerConfig::default();
        config.packet_fraction_divisor = 0;
        assert!(config.validate().is_err());

        let mut config = PacketizerConfig::default();
        config.fixed_packet_size = Some(0);
        assert!(config.validate().is_err());

        let mut config = PacketizerConfig::default();
        config.recent_shard_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PacketizerConfig = toml::from_str(
            r#"
            strategy = "progressive"
            fixed_packet_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, SizeStrategy::Progressive);
        assert_eq!(config.fixed_packet_size, Some(25));
        assert_eq!(config.max_workers_per_host, 4);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("packetizer.toml");
        std::fs::write(&path, "max_workers_per_host = 2\n").unwrap();

        let config = PacketizerConfig::load(&path).unwrap();
        assert_eq!(config.max_workers_per_host, 2);

        std::fs::write(&path, "max_workers_per_host = 0\n").unwrap();
        assert!(PacketizerConfig::load(&path).is_err());
    }
}

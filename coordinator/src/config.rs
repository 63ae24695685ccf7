use crate::errors::{CoordinatorError, Result};
use packetizer::observability::LogFormat;
use packetizer::PacketizerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub packetizer: PacketizerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Simulated worker pool and synthetic dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Workers running on dataset hosts
    pub workers: usize,

    /// Additional workers with no dataset host
    pub remote_workers: usize,

    /// Hosts of the synthetic dataset
    pub hosts: usize,

    /// Shards per host of the synthetic dataset
    pub shards_per_host: usize,

    /// Smallest simulated shard
    pub min_entries: u64,

    /// Largest simulated shard
    pub max_entries: u64,

    /// Publish shard sizes in the synthetic dataset
    pub known_sizes: bool,

    /// Mean worker throughput in entries per second
    pub entries_per_sec: f64,

    /// Relative spread of worker throughput, in [0, 1)
    pub throughput_jitter: f64,

    /// Probability that a worker dies when handed a packet
    pub failure_rate: f64,

    /// Probability that an entry count request fails
    pub count_failure_rate: f64,

    /// Simulated latency of an entry count request
    pub count_latency_ms: u64,

    /// Simulated seconds elapsing per real second
    pub speedup: f64,

    /// Pause before asking again after a retry answer
    pub retry_backoff_ms: u64,

    /// Seed for every random choice of the simulation
    pub seed: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_dir: String,
    pub log_format: LogFormat,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: 6,
            remote_workers: 2,
            hosts: 3,
            shards_per_host: 8,
            min_entries: 5_000,
            max_entries: 50_000,
            known_sizes: false,
            entries_per_sec: 250_000.0,
            throughput_jitter: 0.3,
            failure_rate: 0.0,
            count_failure_rate: 0.0,
            count_latency_ms: 5,
            speedup: 10.0,
            retry_backoff_ms: 20,
            seed: 42,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_dir: "~/.packetizer/logs".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Get default configuration file path: `~/.packetizer/coordinator.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoordinatorError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".packetizer").join("coordinator.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: Config = toml::from_str(&content)?;

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.packetizer.validate()?;

        let sim = &self.simulation;
        if sim.workers + sim.remote_workers == 0 {
            return Err(CoordinatorError::Config(
                "at least one simulated worker is required".into(),
            ));
        }

        if sim.hosts == 0 || sim.shards_per_host == 0 {
            return Err(CoordinatorError::Config(
                "hosts and shards_per_host must be at least 1".into(),
            ));
        }

        if sim.min_entries == 0 || sim.min_entries > sim.max_entries {
            return Err(CoordinatorError::Config(
                "entry range must satisfy 1 <= min_entries <= max_entries".into(),
            ));
        }

        if sim.entries_per_sec <= 0.0 || sim.speedup <= 0.0 {
            return Err(CoordinatorError::Config(
                "entries_per_sec and speedup must be positive".into(),
            ));
        }

        if !(0.0..1.0).contains(&sim.throughput_jitter) {
            return Err(CoordinatorError::Config(
                "throughput_jitter must be in [0, 1)".into(),
            ));
        }

        for (name, rate) in [
            ("failure_rate", sim.failure_rate),
            ("count_failure_rate", sim.count_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(CoordinatorError::Config(format!(
                    "{} must be between 0 and 1",
                    name
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(CoordinatorError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(
                path = %temp_path.display(),
                error = %e,
                "Failed to write temp config file"
            );
            e
        })?;

        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }
}

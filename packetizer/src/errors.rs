use thiserror::Error;

/// Errors that can occur while scheduling packets.
#[derive(Error, Debug)]
pub enum PacketizerError {
    /// IO error occurred (dataset or config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Configuration error (invalid config, duplicate workers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every shard of the dataset is invalid, nothing can be dispatched
    #[error("No valid shards in dataset")]
    NoValidShards,

    /// A request named a worker the scheduler was not built with
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// A request arrived for a worker already declared dead
    #[error("Worker {0} is dead")]
    WorkerDead(String),

    /// Static sizing needs the validation pass before dispatch can start
    #[error("Shard entry counts unknown, validation pass required")]
    ValidationRequired,

    /// The external entry counter failed for a shard
    #[error("Failed to count entries of {path}: {reason}")]
    ShardCount { path: String, reason: String },

    /// Internal invariant or lock failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for packetizer operations.
pub type Result<T> = std::result::Result<T, PacketizerError>;

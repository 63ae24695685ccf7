use packetizer::PacketizerError;
use thiserror::Error;

/// Errors that can occur in the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Configuration error occurred
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error occurred (config and dataset files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Scheduler error
    #[error("Packetizer error: {0}")]
    Packetizer(#[from] PacketizerError),
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

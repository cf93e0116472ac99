//! Download-Census: a resumable download-count harvester
//!
//! This crate builds a complete package-name → download-count dataset from a
//! rate-limited HTTP API, one phase per invocation, persisting its progress in
//! SQLite between runs.

pub mod build;
pub mod config;
pub mod external;
pub mod fetcher;
pub mod output;
pub mod queue;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Download-Census operations
#[derive(Debug, Error)]
pub enum CensusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Aborting invocation after {count} unexpected API errors")]
    ErrorCeiling { count: u32 },

    #[error("Fetch worker failed: {0}")]
    Worker(String),

    #[error("Artifact marked as built but missing at {path}")]
    ArtifactMissing { path: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Name source error: {0}")]
    NameSource(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

impl CensusError {
    /// Returns true if this error is the deliberate abort raised when the
    /// unexpected-error ceiling is reached
    pub fn is_error_ceiling(&self) -> bool {
        matches!(self, Self::ErrorCeiling { .. })
    }
}

/// Result type alias for Download-Census operations
pub type Result<T> = std::result::Result<T, CensusError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use build::{run_invocation, Coordinator, InvocationOutcome};
pub use config::Config;
pub use state::{BuildState, Phase};

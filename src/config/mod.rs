//! Configuration module for Download-Census
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use download_census::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("census.toml")).unwrap();
//! println!("Batch size: {}", config.fetcher.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    month_cycle_name, ApiConfig, Config, CycleConfig, FetcherConfig, NamesConfig, PublishConfig,
    StorageConfig,
};
pub use validation::{validate_cycle_name, MAX_BULK_BATCH};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

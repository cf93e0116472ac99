use crate::config::types::{ApiConfig, Config, CycleConfig, FetcherConfig, PublishConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Largest number of packages the bulk endpoint accepts in one query
pub const MAX_BULK_BATCH: usize = 128;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_storage_config(&config.storage)?;
    validate_publish_config(&config.publish)?;
    validate_cycle_config(&config.cycle)?;

    if config.names.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "names.path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.range.is_empty() || config.range.contains('/') {
        return Err(ConfigError::Validation(format!(
            "range must be a single non-empty path segment, got '{}'",
            config.range
        )));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool and batching configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 64 {
        return Err(ConfigError::Validation(format!(
            "worker-count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.batch_size < 2 || config.batch_size > MAX_BULK_BATCH {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 2 and {}, got {}",
            MAX_BULK_BATCH, config.batch_size
        )));
    }

    if config.min_split_size < 1 || config.min_split_size >= config.batch_size {
        return Err(ConfigError::Validation(format!(
            "min-split-size must be >= 1 and smaller than batch-size ({}), got {}",
            config.batch_size, config.min_split_size
        )));
    }

    if config.query_budget < 1 {
        return Err(ConfigError::Validation(format!(
            "query-budget must be >= 1, got {}",
            config.query_budget
        )));
    }

    if config.max_unexpected_errors < 1 {
        return Err(ConfigError::Validation(format!(
            "max-unexpected-errors must be >= 1, got {}",
            config.max_unexpected_errors
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.artifact_path.is_empty() {
        return Err(ConfigError::Validation(
            "artifact-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the publish command
fn validate_publish_config(config: &PublishConfig) -> Result<(), ConfigError> {
    match config.command.first() {
        Some(program) if !program.is_empty() => Ok(()),
        _ => Err(ConfigError::Validation(
            "publish.command must name a program".to_string(),
        )),
    }
}

/// Validates the cycle name, which is used as a storage namespace
fn validate_cycle_config(config: &CycleConfig) -> Result<(), ConfigError> {
    if let Some(name) = &config.name {
        validate_cycle_name(name)?;
    }
    Ok(())
}

/// Checks that a cycle name is non-empty and made of `[A-Za-z0-9._-]`
pub fn validate_cycle_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "cycle name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::Validation(format!(
            "cycle name '{}' may only contain letters, digits, '.', '-' and '_'",
            name
        )));
    }

    Ok(())
}

use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Download-Census
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
    pub names: NamesConfig,
    pub publish: PublishConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

/// Download-count API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API (e.g. "https://api.npmjs.org")
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Point range queried for every package (e.g. "last-week")
    #[serde(default = "default_range")]
    pub range: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Worker pool and batching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Number of concurrent workers
    #[serde(rename = "worker-count")]
    pub worker_count: u32,

    /// Minimum time between two request starts of the same worker (milliseconds)
    #[serde(rename = "min-request-interval-ms")]
    pub min_request_interval_ms: u64,

    /// Initial size of bulk batches
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Batches at or below this size are demoted to singles instead of split
    #[serde(rename = "min-split-size")]
    pub min_split_size: usize,

    /// Maximum number of queries issued per invocation
    #[serde(rename = "query-budget")]
    pub query_budget: u32,

    /// Number of unexpected errors that aborts the invocation
    #[serde(rename = "max-unexpected-errors")]
    pub max_unexpected_errors: u32,

    /// Cooldown used when a rate-limit response carries no usable Retry-After
    #[serde(rename = "fallback-cooldown-secs", default = "default_fallback_cooldown")]
    pub fallback_cooldown_secs: u64,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding checkpoints, shards and runs
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path of the merged JSON artifact
    #[serde(rename = "artifact-path")]
    pub artifact_path: String,
}

/// Name universe configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NamesConfig {
    /// File with all package names (JSON array or one name per line)
    pub path: PathBuf,
}

/// Publish step configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Program and arguments run to publish the artifact
    pub command: Vec<String>,

    /// Directory the publish command runs in
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,
}

/// Release cycle configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleConfig {
    /// Cycle name; without one the latest unfinished cycle, else the UTC month
    pub name: Option<String>,
}

fn default_range() -> String {
    "last-week".to_string()
}

fn default_user_agent() -> String {
    format!("download-census/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_fallback_cooldown() -> u64 {
    120
}

impl FetcherConfig {
    /// Minimum spacing between request starts of one worker
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Cooldown applied when the server gives no usable retry delay
    pub fn fallback_cooldown(&self) -> Duration {
        Duration::from_secs(self.fallback_cooldown_secs)
    }
}

impl Config {
    /// Cycle named explicitly for this invocation
    ///
    /// An override (e.g. from the command line) wins over the configured
    /// name. `None` means the cycle is picked from the stored checkpoints.
    pub fn explicit_cycle_name(&self, override_name: Option<&str>) -> Option<String> {
        override_name
            .map(str::to_string)
            .or_else(|| self.cycle.name.clone())
    }
}

/// Name of the cycle for the current UTC month (`YYYY-MM`)
pub fn month_cycle_name() -> String {
    Utc::now().format("%Y-%m").to_string()
}

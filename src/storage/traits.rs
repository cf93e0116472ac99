//! Storage traits and error types
//!
//! The coordinator only talks to storage through these traits, so any
//! backend that can keep a JSON blob and a few rows per cycle will do.

use crate::state::{BuildState, Phase};
use crate::storage::{RunRecord, RunStatus};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Shard {index} of cycle {cycle} not found")]
    ShardNotFound { cycle: String, index: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Count for {0} does not fit in the database")]
    CountOverflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable home of the per-cycle [`BuildState`]
pub trait CheckpointStore {
    /// Loads the checkpoint of a cycle, `None` if the cycle never started
    fn load(&self, cycle: &str) -> StorageResult<Option<BuildState>>;

    /// Replaces the checkpoint of a cycle
    fn save(&mut self, cycle: &str, state: &BuildState) -> StorageResult<()>;

    /// Names of the cycles that have a checkpoint, most recently updated first
    fn cycles(&self) -> StorageResult<Vec<String>>;
}

/// Durable home of result shards
pub trait ShardStore {
    /// Writes shard `index` of a cycle
    ///
    /// Writing the same index again replaces its contents, so a crash between
    /// shard write and checkpoint save cannot leave stale rows behind.
    fn write_shard(
        &mut self,
        cycle: &str,
        index: u32,
        counts: &BTreeMap<String, u64>,
    ) -> StorageResult<()>;

    /// Reads shard `index` of a cycle
    ///
    /// A shard that was written empty reads back empty; one that was never
    /// written is a [`StorageError::ShardNotFound`].
    fn read_shard(&self, cycle: &str, index: u32) -> StorageResult<BTreeMap<String, u64>>;
}

/// History of invocations
pub trait RunLog {
    /// Records the start of an invocation and returns its ID
    fn create_run(&mut self, cycle: &str, phase: Phase, config_hash: &str) -> StorageResult<i64>;

    /// Records how an invocation ended
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        queries: u32,
        unexpected_errors: u32,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Most recent runs of a cycle, newest first
    fn recent_runs(&self, cycle: &str, limit: usize) -> StorageResult<Vec<RunRecord>>;
}

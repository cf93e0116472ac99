//! Storage module for persisting cycle progress
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - One JSON checkpoint per release cycle
//! - Immutable result shards
//! - Run tracking for `--stats`

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CheckpointStore, RunLog, ShardStore, StorageError, StorageResult};

use crate::state::Phase;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents one invocation in the database
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub cycle: String,
    pub phase: Phase,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub queries: u32,
    pub unexpected_errors: u32,
    pub error_message: Option<String>,
}

/// Status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

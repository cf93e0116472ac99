//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the checkpoint,
//! shard and run-log traits.

use crate::state::{BuildState, Phase};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, RunLog, ShardStore, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl CheckpointStore for SqliteStorage {
    fn load(&self, cycle: &str) -> StorageResult<Option<BuildState>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state_json FROM checkpoints WHERE cycle = ?1",
                params![cycle],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, cycle: &str, state: &BuildState) -> StorageResult<()> {
        let json = serde_json::to_string(state)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints (cycle, state_json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![cycle, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn cycles(&self) -> StorageResult<Vec<String>> {
        // REPLACE re-inserts the row, so rowid breaks updated_at ties
        let mut stmt = self
            .conn
            .prepare("SELECT cycle FROM checkpoints ORDER BY updated_at DESC, rowid DESC")?;
        let cycles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(cycles)
    }
}

impl ShardStore for SqliteStorage {
    fn write_shard(
        &mut self,
        cycle: &str,
        index: u32,
        counts: &BTreeMap<String, u64>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM shard_counts WHERE cycle = ?1 AND shard_index = ?2",
            params![cycle, index],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO shard_counts (cycle, shard_index, identifier, downloads)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (identifier, downloads) in counts {
                let downloads = i64::try_from(*downloads)
                    .map_err(|_| StorageError::CountOverflow(identifier.clone()))?;
                insert.execute(params![cycle, index, identifier, downloads])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO shards (cycle, shard_index, entry_count, written_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![cycle, index, counts.len() as i64, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn read_shard(&self, cycle: &str, index: u32) -> StorageResult<BTreeMap<String, u64>> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT entry_count FROM shards WHERE cycle = ?1 AND shard_index = ?2",
                params![cycle, index],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            return Err(StorageError::ShardNotFound {
                cycle: cycle.to_string(),
                index,
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT identifier, downloads FROM shard_counts
             WHERE cycle = ?1 AND shard_index = ?2",
        )?;

        let rows = stmt.query_map(params![cycle, index], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (identifier, downloads) = row?;
            counts.insert(identifier, downloads.max(0) as u64);
        }

        Ok(counts)
    }
}

impl RunLog for SqliteStorage {
    fn create_run(&mut self, cycle: &str, phase: Phase, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (cycle, phase, started_at, config_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cycle,
                phase.to_db_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        queries: u32,
        unexpected_errors: u32,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs
             SET finished_at = ?1, status = ?2, queries = ?3, unexpected_errors = ?4,
                 error_message = ?5
             WHERE id = ?6",
            params![
                now,
                status.to_db_string(),
                queries,
                unexpected_errors,
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn recent_runs(&self, cycle: &str, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, cycle, phase, started_at, finished_at, config_hash, status,
                    queries, unexpected_errors, error_message
             FROM runs WHERE cycle = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let runs = stmt
            .query_map(params![cycle, limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    cycle: row.get(1)?,
                    phase: Phase::from_db_string(&row.get::<_, String>(2)?)
                        .unwrap_or(Phase::Init),
                    started_at: row.get(3)?,
                    finished_at: row.get(4)?,
                    config_hash: row.get(5)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
                        .unwrap_or(RunStatus::Running),
                    queries: row.get(7)?,
                    unexpected_errors: row.get(8)?,
                    error_message: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

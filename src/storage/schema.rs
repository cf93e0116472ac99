//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the census database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One checkpoint per release cycle
CREATE TABLE IF NOT EXISTS checkpoints (
    cycle TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Immutable per-invocation fetch results
CREATE TABLE IF NOT EXISTS shards (
    cycle TEXT NOT NULL,
    shard_index INTEGER NOT NULL,
    entry_count INTEGER NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (cycle, shard_index)
);

CREATE TABLE IF NOT EXISTS shard_counts (
    cycle TEXT NOT NULL,
    shard_index INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    downloads INTEGER NOT NULL,
    PRIMARY KEY (cycle, shard_index, identifier)
);

-- Track invocations
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle TEXT NOT NULL,
    phase TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    queries INTEGER NOT NULL DEFAULT 0,
    unexpected_errors INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_shard_counts_cycle ON shard_counts(cycle, shard_index);
CREATE INDEX IF NOT EXISTS idx_runs_cycle ON runs(cycle);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

//! Statistics for `--stats`
//!
//! This module provides functionality for extracting and displaying the
//! progress of a release cycle from the storage layer.

use crate::state::{BuildState, Phase};
use crate::storage::{CheckpointStore, RunLog, RunRecord, ShardStore};
use crate::CensusError;

/// Number of runs shown by `--stats`
pub const RECENT_RUN_LIMIT: usize = 10;

/// Progress summary of one release cycle
#[derive(Debug, Clone)]
pub struct CycleStatistics {
    /// Release cycle name
    pub cycle: String,

    /// Phase the next invocation will execute
    pub next_phase: Phase,

    /// Checkpoint contents, if the cycle has started
    pub checkpoint: Option<BuildState>,

    /// Names counted across all shards written so far
    pub counted_names: usize,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `cycle` - Release cycle to summarize
///
/// # Returns
///
/// * `Ok(CycleStatistics)` - Successfully loaded statistics
/// * `Err(CensusError)` - Failed to query storage
pub fn load_statistics<S>(storage: &S, cycle: &str) -> Result<CycleStatistics, CensusError>
where
    S: CheckpointStore + ShardStore + RunLog,
{
    let checkpoint = storage.load(cycle)?;

    let mut counted_names = 0;
    if let Some(state) = &checkpoint {
        for index in 0..state.counts_files_so_far {
            counted_names += storage.read_shard(cycle, index)?.len();
        }
    }

    Ok(CycleStatistics {
        cycle: cycle.to_string(),
        next_phase: Phase::of(checkpoint.as_ref()),
        checkpoint,
        counted_names,
        recent_runs: storage.recent_runs(cycle, RECENT_RUN_LIMIT)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CycleStatistics) {
    println!("=== Cycle {} ===\n", stats.cycle);
    println!("Next phase: {}", stats.next_phase);
    println!();

    match &stats.checkpoint {
        Some(state) => {
            println!("Checkpoint:");
            println!("  Started: {}", state.created_at.to_rfc3339());
            println!("  Updated: {}", state.updated_at.to_rfc3339());
            println!("  Shards written: {}", state.counts_files_so_far);
            println!("  Names counted: {}", stats.counted_names);
            println!(
                "  Pending: {} names ({} batches, {} singles)",
                state.pending_identifier_count(),
                state.pending_bulk_batches.len(),
                state.pending_singles.len()
            );
            println!("  Blocked: {}", state.blocked_identifiers.len());
            println!("  Excluded: {}", state.excluded_identifiers.len());
            println!("  Artifact built: {}", state.artifact_built);
            println!("  Published: {}", state.published);
        }
        None => println!("No checkpoint yet; the next run initializes the cycle."),
    }
    println!();

    if stats.recent_runs.is_empty() {
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} {} [{}] queries={} errors={}",
            run.id,
            run.started_at,
            run.phase,
            run.status.to_db_string(),
            run.queries,
            run.unexpected_errors
        );
        if let Some(message) = &run.error_message {
            println!("      {}", message);
        }
    }
}

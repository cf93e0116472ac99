//! Build cycle orchestration
//!
//! This module ties the collaborators together:
//! - `coordinator`: executes one phase per invocation
//! - `merge`: shard merging and artifact I/O
//! - `resolve_cycle`: which release cycle an invocation works on

mod coordinator;
mod merge;

pub use coordinator::{Coordinator, InvocationOutcome};
pub use merge::{merge_shards, read_artifact, write_artifact, MergedCounts};

use crate::config::{month_cycle_name, validate_cycle_name, Config};
use crate::external::{CommandPublisher, FileNameSource};
use crate::state::Phase;
use crate::storage::{open_storage, CheckpointStore};
use crate::CensusError;
use std::path::Path;
use tracing::info;

/// Picks the release cycle an invocation works on
///
/// An explicit name (command line, then config) always wins. Otherwise the
/// most recently updated cycle that is not yet published is resumed, and
/// only when every stored cycle is done does the current UTC month start.
pub fn resolve_cycle<S: CheckpointStore>(
    config: &Config,
    cycle_override: Option<&str>,
    storage: &S,
) -> Result<String, CensusError> {
    let cycle = match config.explicit_cycle_name(cycle_override) {
        Some(name) => name,
        None => match unfinished_cycle(storage)? {
            Some(name) => {
                info!("Resuming unfinished cycle {}", name);
                name
            }
            None => month_cycle_name(),
        },
    };

    validate_cycle_name(&cycle)?;
    Ok(cycle)
}

fn unfinished_cycle<S: CheckpointStore>(storage: &S) -> Result<Option<String>, CensusError> {
    for cycle in storage.cycles()? {
        let state = storage.load(&cycle)?;
        if !Phase::of(state.as_ref()).is_terminal() {
            return Ok(Some(cycle));
        }
    }
    Ok(None)
}

/// Runs one invocation with the shipped collaborators
///
/// Opens the SQLite database, reads names from the configured file and
/// publishes with the configured command.
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `cycle_override` - Cycle name taking precedence over the config
/// * `config_hash` - Hash of the config file, recorded with the run
pub async fn run_invocation(
    config: Config,
    cycle_override: Option<&str>,
    config_hash: &str,
) -> Result<InvocationOutcome, CensusError> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let cycle = resolve_cycle(&config, cycle_override, &storage)?;

    let names = FileNameSource::new(config.names.path.clone());
    let publisher = CommandPublisher::from_config(&config.publish)?;

    let mut coordinator = Coordinator::new(config, cycle, config_hash, storage, names, publisher);
    coordinator.run().await
}

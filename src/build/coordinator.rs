//! Build coordinator - one phase per invocation
//!
//! This module contains the per-invocation driver, which:
//! - Loads the cycle's checkpoint exactly once
//! - Derives the phase to execute with [`Phase::of`]
//! - Executes that single phase
//! - Saves the checkpoint exactly once (never for `Done` or a failed phase)
//! - Records the invocation in the run log

use crate::build::merge::{merge_shards, read_artifact, write_artifact};
use crate::config::Config;
use crate::external::{ArtifactPublisher, NameSource};
use crate::fetcher::{DownloadsClient, FetchPool, FetchReport, FetchSettings, RateGate};
use crate::queue::{partition_universe, WorkQueue};
use crate::state::{BuildState, Phase};
use crate::storage::{CheckpointStore, RunLog, RunStatus, ShardStore};
use crate::CensusError;
use std::path::Path;

/// What a single invocation did
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Release cycle the invocation worked on
    pub cycle: String,

    /// Phase that was executed
    pub phase: Phase,

    /// Phase the next invocation will execute
    pub next_phase: Phase,

    /// Fetch counters, for `Fetching` invocations
    pub fetch: Option<FetchReport>,

    /// Names written into the artifact, for `Merging` invocations
    pub merged_entries: Option<usize>,

    /// Names found in more than one shard while merging
    pub merge_duplicates: Vec<String>,
}

impl InvocationOutcome {
    fn new(cycle: &str, phase: Phase, next_phase: Phase) -> Self {
        Self {
            cycle: cycle.to_string(),
            phase,
            next_phase,
            fetch: None,
            merged_entries: None,
            merge_duplicates: Vec::new(),
        }
    }
}

/// Drives one invocation of a release cycle
pub struct Coordinator<S, N, P> {
    config: Config,
    cycle: String,
    config_hash: String,
    storage: S,
    names: N,
    publisher: P,
}

impl<S, N, P> Coordinator<S, N, P>
where
    S: CheckpointStore + ShardStore + RunLog,
    N: NameSource,
    P: ArtifactPublisher,
{
    /// Creates a coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `cycle` - Release cycle to work on
    /// * `config_hash` - Hash recorded with the run
    /// * `storage` - Checkpoint, shard and run storage
    /// * `names` - Source of the name universe
    /// * `publisher` - Destination of the finished artifact
    pub fn new(
        config: Config,
        cycle: impl Into<String>,
        config_hash: impl Into<String>,
        storage: S,
        names: N,
        publisher: P,
    ) -> Self {
        Self {
            config,
            cycle: cycle.into(),
            config_hash: config_hash.into(),
            storage,
            names,
            publisher,
        }
    }

    /// The storage backend, e.g. for inspecting state after a run
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Consumes the coordinator and returns its storage backend
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Executes exactly one phase of the cycle
    ///
    /// # Returns
    ///
    /// * `Ok(InvocationOutcome)` - The phase completed and its result was saved
    /// * `Err(CensusError)` - The phase failed; the checkpoint is unchanged
    pub async fn run(&mut self) -> Result<InvocationOutcome, CensusError> {
        let state = self.storage.load(&self.cycle)?;
        let phase = Phase::of(state.as_ref());

        tracing::info!("Cycle {}: executing phase {}", self.cycle, phase);

        let run_id = self.storage.create_run(&self.cycle, phase, &self.config_hash)?;

        let result = match (phase, state) {
            (Phase::Init, _) => self.initialize(),
            (Phase::Done, _) => {
                tracing::info!("Cycle {} is already published, nothing to do", self.cycle);
                Ok(InvocationOutcome::new(&self.cycle, Phase::Done, Phase::Done))
            }
            (Phase::Fetching, Some(state)) => self.fetch(state).await,
            (Phase::Merging, Some(state)) => self.merge(state),
            (Phase::Publishing, Some(state)) => self.publish(state),
            // Phase::of only yields Init for a missing checkpoint
            (_, None) => self.initialize(),
        };

        match &result {
            Ok(outcome) => {
                let (queries, errors) = outcome
                    .fetch
                    .as_ref()
                    .map(|r| (r.queries, r.unexpected_errors))
                    .unwrap_or((0, 0));
                self.storage
                    .finish_run(run_id, RunStatus::Completed, queries, errors, None)?;
                tracing::info!(
                    "Cycle {}: {} finished, next invocation will run {}",
                    self.cycle,
                    outcome.phase,
                    outcome.next_phase
                );
            }
            Err(e) => {
                let errors = match e {
                    CensusError::ErrorCeiling { count } => *count,
                    _ => 0,
                };
                let message = e.to_string();
                if let Err(log_err) = self.storage.finish_run(
                    run_id,
                    RunStatus::Failed,
                    0,
                    errors,
                    Some(&message),
                ) {
                    tracing::warn!("Failed to record run failure: {}", log_err);
                }
                tracing::error!("Cycle {}: {} failed: {}", self.cycle, phase, message);
            }
        }

        result
    }

    /// Seeds the queue from the name universe; no API calls
    fn initialize(&mut self) -> Result<InvocationOutcome, CensusError> {
        let names = self.names.load_names()?;
        let universe = names.len();
        let partition = partition_universe(names, self.config.fetcher.batch_size);

        tracing::info!(
            "Partitioned {} names into {} bulk batches and {} singles ({} excluded)",
            universe,
            partition.bulk_batches.len(),
            partition.singles.len(),
            partition.excluded.len()
        );
        for name in &partition.excluded {
            tracing::debug!("Excluding unaddressable name {:?}", name);
        }

        let state = BuildState::new(partition.bulk_batches, partition.singles, partition.excluded);
        self.storage.save(&self.cycle, &state)?;

        Ok(InvocationOutcome::new(
            &self.cycle,
            Phase::Init,
            Phase::of(Some(&state)),
        ))
    }

    /// Queries a budget's worth of pending work and writes the next shard
    async fn fetch(&mut self, mut state: BuildState) -> Result<InvocationOutcome, CensusError> {
        let client = DownloadsClient::new(&self.config.api)?;
        let gate = RateGate::new(
            self.config.fetcher.min_request_interval(),
            self.config.fetcher.fallback_cooldown(),
        );
        let pool = FetchPool::new(client, gate, FetchSettings::from(&self.config.fetcher));

        // An error-ceiling abort returns here: no shard, no checkpoint
        let outcome = pool.run(WorkQueue::from_state(&state)).await?;

        let index = state.counts_files_so_far;
        self.storage.write_shard(&self.cycle, index, &outcome.counts)?;
        tracing::info!(
            "Wrote shard {} with {} counts",
            index,
            outcome.counts.len()
        );

        let (batches, singles) = outcome.queue.into_parts();
        state.counts_files_so_far += 1;
        state.pending_bulk_batches = batches;
        state.pending_singles = singles;
        state.blocked_identifiers.extend(outcome.blocked);
        state.touch();
        self.storage.save(&self.cycle, &state)?;

        tracing::info!(
            "{} names still pending after this invocation",
            state.pending_identifier_count()
        );

        let mut result = InvocationOutcome::new(&self.cycle, Phase::Fetching, Phase::of(Some(&state)));
        result.fetch = Some(outcome.report);
        Ok(result)
    }

    /// Merges every shard into the artifact file
    fn merge(&mut self, mut state: BuildState) -> Result<InvocationOutcome, CensusError> {
        let shards = (0..state.counts_files_so_far)
            .map(|index| self.storage.read_shard(&self.cycle, index))
            .collect::<Result<Vec<_>, _>>()?;

        let merged = merge_shards(shards);
        if !merged.duplicates.is_empty() {
            tracing::warn!(
                "{} names appeared in more than one shard; kept the later count",
                merged.duplicates.len()
            );
        }

        let artifact_path = Path::new(&self.config.storage.artifact_path);
        write_artifact(artifact_path, &merged.counts)?;
        tracing::info!(
            "Merged {} shards into {} ({} entries)",
            state.counts_files_so_far,
            artifact_path.display(),
            merged.counts.len()
        );

        state.artifact_built = true;
        state.touch();
        self.storage.save(&self.cycle, &state)?;

        let mut result = InvocationOutcome::new(&self.cycle, Phase::Merging, Phase::of(Some(&state)));
        result.merged_entries = Some(merged.counts.len());
        result.merge_duplicates = merged.duplicates;
        Ok(result)
    }

    /// Hands the artifact to the publisher
    fn publish(&mut self, mut state: BuildState) -> Result<InvocationOutcome, CensusError> {
        let artifact_path = Path::new(&self.config.storage.artifact_path);
        let counts = read_artifact(artifact_path)?;

        self.publisher.publish(artifact_path, &counts)?;

        state.published = true;
        state.touch();
        self.storage.save(&self.cycle, &state)?;

        Ok(InvocationOutcome::new(
            &self.cycle,
            Phase::Publishing,
            Phase::of(Some(&state)),
        ))
    }
}

//! Fetch worker pool
//!
//! A fixed number of tokio tasks drain one shared [`WorkQueue`]. Each worker
//! issues one gated request at a time and folds the classified reply back
//! into the shared state:
//!
//! | Unit   | Verdict        | Action                                  |
//! |--------|----------------|-----------------------------------------|
//! | batch  | Success        | record counts, null entries omitted     |
//! | batch  | ShapeRejected  | split in half or demote to singles      |
//! | single | Success        | record count                            |
//! | single | NotFound       | drop                                    |
//! | single | Blocked        | move to the blocked list                |
//! | any    | Unexpected     | requeue unchanged, count an error       |
//! | any    | transport error| requeue unchanged, count an error       |
//!
//! Reaching the unexpected-error ceiling aborts the whole pool.

use crate::config::FetcherConfig;
use crate::fetcher::classify::{classify_bulk, classify_single, Verdict};
use crate::fetcher::client::{parse_bulk_counts, parse_single_count, ApiReply, DownloadsClient};
use crate::fetcher::gate::{RateGate, WorkerPacer};
use crate::queue::{split_batch, SplitOutcome, WorkQueue, WorkUnit};
use crate::CensusError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Log a progress line every this many resolved queries
const PROGRESS_EVERY: u32 = 100;

/// Limits of one fetch invocation
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub worker_count: usize,
    pub query_budget: u32,
    pub max_unexpected_errors: u32,
    pub min_split_size: usize,
}

impl From<&FetcherConfig> for FetchSettings {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            worker_count: config.worker_count as usize,
            query_budget: config.query_budget,
            max_unexpected_errors: config.max_unexpected_errors,
            min_split_size: config.min_split_size,
        }
    }
}

/// Counters collected during one fetch invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Logical queries issued (rate-limit retries excluded)
    pub queries: u32,

    /// Transport failures, unexpected statuses and unparseable bodies
    pub unexpected_errors: u32,

    /// Rejected batches split in half
    pub batches_split: u32,

    /// Names moved from rejected batches to singles
    pub names_demoted: u32,

    /// Names the registry reported as absent
    pub not_found: Vec<String>,

    /// Names that were counted more than once in this invocation
    pub duplicates: Vec<String>,
}

/// Result of a completed fetch invocation
#[derive(Debug)]
pub struct FetchOutcome {
    /// Counts gathered this invocation (the next shard)
    pub counts: BTreeMap<String, u64>,

    /// Names newly found to be permanently blocked
    pub blocked: Vec<String>,

    /// Work left for later invocations
    pub queue: WorkQueue,

    pub report: FetchReport,
}

/// What a worker should do next
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Work(WorkUnit),
    Wait,
    Stop,
}

/// State shared by all workers
#[derive(Debug, Default)]
struct PoolState {
    queue: WorkQueue,
    counts: BTreeMap<String, u64>,
    blocked: Vec<String>,
    report: FetchReport,
    in_flight: usize,
    resolved: u32,
    aborted: bool,
}

impl PoolState {
    fn new(queue: WorkQueue) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }

    /// Hands out the next unit, charging it against the query budget
    fn next_unit(&mut self, settings: &FetchSettings) -> Next {
        if self.aborted || self.report.queries >= settings.query_budget {
            return Next::Stop;
        }

        match self.queue.pop() {
            Some(unit) => {
                self.report.queries += 1;
                self.in_flight += 1;
                Next::Work(unit)
            }
            // Another worker may still requeue or split its unit
            None if self.in_flight > 0 => Next::Wait,
            None => Next::Stop,
        }
    }

    /// Folds the outcome of one query back into the shared state
    fn resolve(&mut self, unit: WorkUnit, attempt: Result<ApiReply, String>, settings: &FetchSettings) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.resolved += 1;

        match unit {
            WorkUnit::Batch(batch) => self.resolve_batch(batch, attempt, settings),
            WorkUnit::Single(name) => self.resolve_single(name, attempt),
        }

        if !self.aborted && self.report.unexpected_errors >= settings.max_unexpected_errors {
            self.aborted = true;
            tracing::error!(
                "Reached {} unexpected errors, aborting fetch",
                self.report.unexpected_errors
            );
        }

        if self.resolved % PROGRESS_EVERY == 0 {
            tracing::info!(
                "Progress: {} queries, {} counted, {} names pending, {} errors",
                self.report.queries,
                self.counts.len(),
                self.queue.identifier_count(),
                self.report.unexpected_errors
            );
        }
    }

    fn resolve_batch(
        &mut self,
        batch: Vec<String>,
        attempt: Result<ApiReply, String>,
        settings: &FetchSettings,
    ) {
        let reply = match attempt {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!("Request for batch of {} failed: {}", batch.len(), error);
                self.unexpected(WorkUnit::Batch(batch));
                return;
            }
        };

        match classify_bulk(reply.status) {
            Verdict::Success => {
                // The API answers a one-name query in single shape
                let parsed: Result<BTreeMap<String, u64>, serde_json::Error> =
                    if let [name] = batch.as_slice() {
                        parse_single_count(&reply.body)
                            .map(|count| count.map(|c| (name.clone(), c)).into_iter().collect())
                    } else {
                        parse_bulk_counts(&reply.body, &batch)
                    };

                match parsed {
                    Ok(counts) => self.record_counts(counts),
                    Err(e) => {
                        tracing::warn!("Unparseable bulk reply: {}", e);
                        self.unexpected(WorkUnit::Batch(batch));
                    }
                }
            }
            Verdict::ShapeRejected => {
                let size = batch.len();
                let outcome = split_batch(batch, settings.min_split_size);
                match &outcome {
                    SplitOutcome::Halves(front, back) => {
                        self.report.batches_split += 1;
                        tracing::warn!(
                            "Batch of {} rejected with HTTP {}, splitting into {} + {}",
                            size,
                            reply.status.as_u16(),
                            front.len(),
                            back.len()
                        );
                    }
                    SplitOutcome::Demote(names) => {
                        self.report.names_demoted += names.len() as u32;
                        tracing::warn!(
                            "Batch of {} rejected with HTTP {}, demoting to single queries",
                            size,
                            reply.status.as_u16()
                        );
                    }
                }
                self.queue.apply_split(outcome);
            }
            _ => {
                tracing::warn!(
                    "Unexpected HTTP {} for batch of {}",
                    reply.status.as_u16(),
                    batch.len()
                );
                self.unexpected(WorkUnit::Batch(batch));
            }
        }
    }

    fn resolve_single(&mut self, name: String, attempt: Result<ApiReply, String>) {
        let reply = match attempt {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!("Request for {} failed: {}", name, error);
                self.unexpected(WorkUnit::Single(name));
                return;
            }
        };

        match classify_single(reply.status) {
            Verdict::Success => match parse_single_count(&reply.body) {
                Ok(Some(count)) => self.record_counts([(name, count)]),
                Ok(None) => tracing::debug!("No data for {}", name),
                Err(e) => {
                    tracing::warn!("Unparseable reply for {}: {}", name, e);
                    self.unexpected(WorkUnit::Single(name));
                }
            },
            Verdict::NotFound => {
                tracing::debug!("{} not found, dropping", name);
                self.report.not_found.push(name);
            }
            Verdict::Blocked => {
                tracing::warn!(
                    "{} blocked with HTTP {}, excluding permanently",
                    name,
                    reply.status.as_u16()
                );
                self.blocked.push(name);
            }
            _ => {
                tracing::warn!("Unexpected HTTP {} for {}", reply.status.as_u16(), name);
                self.unexpected(WorkUnit::Single(name));
            }
        }
    }

    fn unexpected(&mut self, unit: WorkUnit) {
        self.report.unexpected_errors += 1;
        self.queue.requeue(unit);
    }

    fn record_counts(&mut self, counts: impl IntoIterator<Item = (String, u64)>) {
        for (name, count) in counts {
            if self.counts.insert(name.clone(), count).is_some() {
                tracing::warn!("{} was counted twice in one invocation", name);
                self.report.duplicates.push(name);
            }
        }
    }
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pool state plus the wake-up for workers idling on in-flight units
struct Shared {
    state: Mutex<PoolState>,
    resolved: Notify,
}

impl Shared {
    fn new(queue: WorkQueue) -> Self {
        Self {
            state: Mutex::new(PoolState::new(queue)),
            resolved: Notify::new(),
        }
    }

    /// Next unit to query, or `None` once this worker should stop
    ///
    /// Sleeps while the queue is empty but other units are in flight, until
    /// one of them is resolved.
    async fn next_unit(&self, settings: &FetchSettings) -> Option<WorkUnit> {
        loop {
            let resolved = self.resolved.notified();
            tokio::pin!(resolved);
            // Registered before looking, so a resolve in between still wakes us
            resolved.as_mut().enable();

            let next = lock_state(&self.state).next_unit(settings);
            match next {
                Next::Work(unit) => return Some(unit),
                Next::Stop => return None,
                Next::Wait => resolved.await,
            }
        }
    }

    fn resolve(&self, unit: WorkUnit, attempt: Result<ApiReply, String>, settings: &FetchSettings) {
        lock_state(&self.state).resolve(unit, attempt, settings);
        self.resolved.notify_waiters();
    }
}

/// Pool of fetch workers sharing one gate and one queue
pub struct FetchPool {
    client: Arc<DownloadsClient>,
    gate: Arc<RateGate>,
    settings: FetchSettings,
}

impl FetchPool {
    pub fn new(client: DownloadsClient, gate: RateGate, settings: FetchSettings) -> Self {
        Self {
            client: Arc::new(client),
            gate: Arc::new(gate),
            settings,
        }
    }

    /// Drains the queue until it is empty or the query budget is spent
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - Counts, newly blocked names and the remaining queue
    /// * `Err(CensusError::ErrorCeiling)` - Too many unexpected errors
    /// * `Err(CensusError::Worker)` - A worker task panicked
    pub async fn run(&self, queue: WorkQueue) -> Result<FetchOutcome, CensusError> {
        tracing::info!(
            "Starting {} workers on {} batches and {} singles (budget {} queries)",
            self.settings.worker_count,
            queue.batch_count(),
            queue.single_count(),
            self.settings.query_budget
        );

        let shared = Arc::new(Shared::new(queue));
        let mut join_set = JoinSet::new();

        for worker_id in 0..self.settings.worker_count.max(1) {
            join_set.spawn(run_worker(
                worker_id,
                Arc::clone(&self.client),
                Arc::clone(&self.gate),
                Arc::clone(&shared),
                self.settings.clone(),
            ));
        }

        let mut worker_failure = None;
        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Fetch worker task failed: {}", e);
                worker_failure = Some(e.to_string());
                // Its unit stays in flight forever, so idle workers would never wake
                join_set.abort_all();
            }
        }

        let state = std::mem::take(&mut *lock_state(&shared.state));

        if let Some(message) = worker_failure {
            return Err(CensusError::Worker(message));
        }

        if state.aborted {
            return Err(CensusError::ErrorCeiling {
                count: state.report.unexpected_errors,
            });
        }

        tracing::info!(
            "Fetch finished: {} queries, {} counted, {} blocked, {} not found, {} rate limits",
            state.report.queries,
            state.counts.len(),
            state.blocked.len(),
            state.report.not_found.len(),
            self.gate.rate_limit_hits()
        );

        Ok(FetchOutcome {
            counts: state.counts,
            blocked: state.blocked,
            queue: state.queue,
            report: state.report,
        })
    }
}

async fn run_worker(
    worker_id: usize,
    client: Arc<DownloadsClient>,
    gate: Arc<RateGate>,
    shared: Arc<Shared>,
    settings: FetchSettings,
) {
    let mut pacer = WorkerPacer::new();

    while let Some(unit) = shared.next_unit(&settings).await {
        let attempt = gate
            .send(&mut pacer, || client.get_point(unit.names()))
            .await
            .map_err(|e| e.to_string());

        shared.resolve(unit, attempt, &settings);
    }

    tracing::debug!("Worker {} finished", worker_id);
}

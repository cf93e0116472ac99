//! Integration tests for the build cycle
//!
//! These tests use wiremock to stand in for the download-count API and drive
//! the coordinator through whole release cycles, one invocation at a time.

use download_census::build::read_artifact;
use download_census::config::{
    ApiConfig, Config, CycleConfig, FetcherConfig, NamesConfig, PublishConfig, StorageConfig,
};
use download_census::external::{ArtifactPublisher, NameSource};
use download_census::storage::{
    CheckpointStore, RunLog, RunStatus, ShardStore, SqliteStorage, StorageError,
};
use download_census::{BuildState, CensusError, Coordinator, Phase};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CYCLE: &str = "2026-10";

struct ListNames(Vec<String>);

impl NameSource for ListNames {
    fn load_names(&self) -> Result<Vec<String>, CensusError> {
        Ok(self.0.clone())
    }
}

/// Publisher that remembers what it was handed
#[derive(Clone, Default)]
struct RecordingPublisher {
    published: Arc<Mutex<Vec<BTreeMap<String, u64>>>>,
}

impl RecordingPublisher {
    fn calls(&self) -> Vec<BTreeMap<String, u64>> {
        self.published.lock().unwrap().clone()
    }
}

impl ArtifactPublisher for RecordingPublisher {
    fn publish(
        &self,
        _artifact_path: &Path,
        counts: &BTreeMap<String, u64>,
    ) -> Result<(), CensusError> {
        self.published.lock().unwrap().push(counts.clone());
        Ok(())
    }
}

/// Creates a test configuration against the given mock server
fn create_test_config(base_url: &str, dir: &TempDir, batch_size: usize) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            range: "last-week".to_string(),
            user_agent: "TestCensus/1.0".to_string(),
            request_timeout_secs: 5,
        },
        fetcher: FetcherConfig {
            worker_count: 1,
            min_request_interval_ms: 0,
            batch_size,
            min_split_size: 1,
            query_budget: 100,
            max_unexpected_errors: 5,
            fallback_cooldown_secs: 1,
        },
        storage: StorageConfig {
            database_path: dir.path().join("census.db").display().to_string(),
            artifact_path: dir.path().join("counts.json").display().to_string(),
        },
        names: NamesConfig {
            path: dir.path().join("names.json"),
        },
        publish: PublishConfig {
            command: vec!["true".to_string()],
            working_dir: None,
        },
        cycle: CycleConfig::default(),
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn open_storage(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join("census.db")).unwrap()
}

fn coordinator(
    config: Config,
    storage: SqliteStorage,
    universe: &[&str],
    publisher: RecordingPublisher,
) -> Coordinator<SqliteStorage, ListNames, RecordingPublisher> {
    Coordinator::new(
        config,
        CYCLE,
        "test-hash",
        storage,
        ListNames(names(universe)),
        publisher,
    )
}

async fn mount_json(server: &MockServer, route: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Every shard written so far, merged
fn counted<S: CheckpointStore + ShardStore>(storage: &S, state: &BuildState) -> BTreeMap<String, u64> {
    let mut all = BTreeMap::new();
    for index in 0..state.counts_files_so_far {
        all.extend(storage.read_shard(CYCLE, index).unwrap());
    }
    all
}

/// Asserts that every name is accounted for exactly once
fn assert_coverage<S: CheckpointStore + ShardStore>(
    storage: &S,
    universe: &[&str],
    not_found: &[String],
) {
    let state = storage.load(CYCLE).unwrap().unwrap();

    let mut buckets: Vec<String> = counted(storage, &state).into_keys().collect();
    buckets.extend(state.pending_bulk_batches.iter().flatten().cloned());
    buckets.extend(state.pending_singles.iter().cloned());
    buckets.extend(state.blocked_identifiers.iter().cloned());
    buckets.extend(state.excluded_identifiers.iter().cloned());
    buckets.extend(not_found.iter().cloned());

    let distinct: BTreeSet<String> = buckets.iter().cloned().collect();
    assert_eq!(distinct.len(), buckets.len(), "a name is in two places: {:?}", buckets);

    let expected: BTreeSet<String> = universe.iter().map(|s| s.to_string()).collect();
    assert_eq!(distinct, expected);
}

#[tokio::test]
async fn test_full_cycle_bulk_and_scoped() {
    let mock_server = MockServer::start().await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/x,y",
        200,
        json!({
            "x": {"downloads": 10, "package": "x"},
            "y": {"downloads": 0, "package": "y"}
        }),
    )
    .await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/@scope/z",
        200,
        json!({"downloads": 5, "package": "@scope/z"}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), &dir, 2);
    let artifact_path = dir.path().join("counts.json");
    let publisher = RecordingPublisher::default();
    let mut coord = coordinator(config, open_storage(&dir), &["x", "y", "@scope/z"], publisher.clone());

    // Init: partition only, no requests
    let init = coord.run().await.unwrap();
    assert_eq!(init.phase, Phase::Init);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
    let state = coord.storage().load(CYCLE).unwrap().unwrap();
    assert_eq!(state.pending_bulk_batches, vec![names(&["x", "y"])]);
    assert_eq!(state.pending_singles, names(&["@scope/z"]));

    // Fetch: one bulk and one single request
    let fetch = coord.run().await.unwrap();
    assert_eq!(fetch.phase, Phase::Fetching);
    assert_eq!(fetch.next_phase, Phase::Merging);
    assert_eq!(fetch.fetch.as_ref().unwrap().queries, 2);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    assert!(!artifact_path.exists());

    // Merge
    let merge = coord.run().await.unwrap();
    assert_eq!(merge.phase, Phase::Merging);
    assert_eq!(merge.next_phase, Phase::Publishing);
    let expected: BTreeMap<String, u64> = [
        ("x".to_string(), 10),
        ("y".to_string(), 0),
        ("@scope/z".to_string(), 5),
    ]
    .into();
    assert_eq!(read_artifact(&artifact_path).unwrap(), expected);
    assert!(publisher.calls().is_empty());

    // Publish
    let publish = coord.run().await.unwrap();
    assert_eq!(publish.phase, Phase::Publishing);
    assert_eq!(publish.next_phase, Phase::Done);
    assert_eq!(publisher.calls(), vec![expected]);

    // Done is a no-op that leaves the checkpoint untouched
    let before = coord.storage().load(CYCLE).unwrap().unwrap();
    for _ in 0..2 {
        let done = coord.run().await.unwrap();
        assert_eq!(done.phase, Phase::Done);
    }
    let after = coord.storage().load(CYCLE).unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(publisher.calls().len(), 1);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

    let runs = coord.storage().recent_runs(CYCLE, 10).unwrap();
    assert_eq!(runs.len(), 6);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_anti_abuse_block_splits_batch() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, "/downloads/point/last-week/a,b,c,d", 403).await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/a,b",
        200,
        json!({"a": {"downloads": 1}, "b": {"downloads": 2}}),
    )
    .await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/c,d",
        200,
        json!({"c": {"downloads": 3}, "d": null}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), &dir, 4);
    let universe = ["a", "b", "c", "d"];
    let mut coord = coordinator(config, open_storage(&dir), &universe, RecordingPublisher::default());

    coord.run().await.unwrap();
    let fetch = coord.run().await.unwrap();

    let report = fetch.fetch.unwrap();
    assert_eq!(report.queries, 3);
    assert_eq!(report.batches_split, 1);
    assert_eq!(report.unexpected_errors, 0);
    assert_eq!(fetch.next_phase, Phase::Merging);

    let shard = coord.storage().read_shard(CYCLE, 0).unwrap();
    let expected: BTreeMap<String, u64> =
        [("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)].into();
    assert_eq!(shard, expected);
}

#[tokio::test]
async fn test_single_not_found_is_dropped() {
    let mock_server = MockServer::start().await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/@s/gone",
        404,
        json!({"error": "package @s/gone not found"}),
    )
    .await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/@s/here",
        200,
        json!({"downloads": 9, "package": "@s/here"}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), &dir, 2);
    let universe = ["@s/gone", "@s/here"];
    let mut coord = coordinator(config, open_storage(&dir), &universe, RecordingPublisher::default());

    coord.run().await.unwrap();
    let fetch = coord.run().await.unwrap();
    let report = fetch.fetch.unwrap();

    assert_eq!(report.not_found, names(&["@s/gone"]));
    assert_eq!(report.unexpected_errors, 0);

    let state = coord.storage().load(CYCLE).unwrap().unwrap();
    assert!(!state.has_pending_work());
    assert!(state.blocked_identifiers.is_empty());
    assert_coverage(coord.storage(), &universe, &report.not_found);
}

#[tokio::test]
async fn test_rate_limit_is_retried_after_retry_after() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/downloads/point/last-week/x,y"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0.3"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/x,y",
        200,
        json!({"x": {"downloads": 1}, "y": {"downloads": 2}}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), &dir, 2);
    let mut coord = coordinator(config, open_storage(&dir), &["x", "y"], RecordingPublisher::default());

    coord.run().await.unwrap();
    let started = Instant::now();
    let fetch = coord.run().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    let report = fetch.fetch.unwrap();
    // The retry is transparent: one logical query, no error
    assert_eq!(report.queries, 1);
    assert_eq!(report.unexpected_errors, 0);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    assert_eq!(coord.storage().read_shard(CYCLE, 0).unwrap().len(), 2);
}

#[tokio::test]
async fn test_error_ceiling_writes_nothing() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, "/downloads/point/last-week/x,y", 500).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), &dir, 2);
    config.fetcher.max_unexpected_errors = 3;
    let mut coord = coordinator(config, open_storage(&dir), &["x", "y"], RecordingPublisher::default());

    coord.run().await.unwrap();
    let before = coord.storage().load(CYCLE).unwrap().unwrap();

    let result = coord.run().await;
    assert!(matches!(result, Err(CensusError::ErrorCeiling { count: 3 })));

    let after = coord.storage().load(CYCLE).unwrap().unwrap();
    assert_eq!(before, after);
    assert!(matches!(
        coord.storage().read_shard(CYCLE, 0),
        Err(StorageError::ShardNotFound { .. })
    ));

    let runs = coord.storage().recent_runs(CYCLE, 1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].unexpected_errors, 3);

    // The next invocation retries the same phase
    assert_eq!(Phase::of(Some(&after)), Phase::Fetching);
}

#[tokio::test]
async fn test_coverage_holds_across_invocations() {
    let mock_server = MockServer::start().await;
    mount_status(&mock_server, "/downloads/point/last-week/a,b,c,d", 403).await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/a,b",
        200,
        json!({"a": {"downloads": 1}, "b": {"downloads": 2}}),
    )
    .await;
    mount_status(&mock_server, "/downloads/point/last-week/c,d", 413).await;
    mount_status(&mock_server, "/downloads/point/last-week/@s/gone", 404).await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/@s/e",
        200,
        json!({"downloads": 3, "package": "@s/e"}),
    )
    .await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/c",
        200,
        json!({"downloads": 4, "package": "c"}),
    )
    .await;
    mount_status(&mock_server, "/downloads/point/last-week/d", 451).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), &dir, 4);
    config.fetcher.min_split_size = 2;
    config.fetcher.query_budget = 4;
    let universe = ["a", "b", "c", "d", "@s/gone", "..", "@s/e"];
    let mut coord = coordinator(config, open_storage(&dir), &universe, RecordingPublisher::default());
    let mut not_found = Vec::new();

    coord.run().await.unwrap();
    assert_coverage(coord.storage(), &universe, &not_found);

    let first = coord.run().await.unwrap();
    assert_eq!(first.next_phase, Phase::Fetching);
    not_found.extend(first.fetch.unwrap().not_found);
    assert_coverage(coord.storage(), &universe, &not_found);

    let state = coord.storage().load(CYCLE).unwrap().unwrap();
    assert!(state.pending_bulk_batches.is_empty());
    assert_eq!(state.pending_singles, names(&["@s/e", "c", "d"]));

    let second = coord.run().await.unwrap();
    assert_eq!(second.next_phase, Phase::Merging);
    not_found.extend(second.fetch.unwrap().not_found);
    assert_coverage(coord.storage(), &universe, &not_found);

    let state = coord.storage().load(CYCLE).unwrap().unwrap();
    assert_eq!(state.counts_files_so_far, 2);
    assert_eq!(state.blocked_identifiers, names(&["d"]));
    assert_eq!(state.excluded_identifiers, names(&[".."]));
    assert_eq!(not_found, names(&["@s/gone"]));

    let merge = coord.run().await.unwrap();
    assert_eq!(merge.merged_entries, Some(4));
    assert!(merge.merge_duplicates.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_invocation_with_shipped_collaborators() {
    use download_census::run_invocation;

    let mock_server = MockServer::start().await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/left,right",
        200,
        json!({"left": {"downloads": 7}, "right": {"downloads": 8}}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("names.json"), r#"["left", "right"]"#).unwrap();

    let mut config = create_test_config(&mock_server.uri(), &dir, 2);
    config.publish = PublishConfig {
        command: names(&["sh", "-c", "cp \"$CENSUS_ARTIFACT\" published.json"]),
        working_dir: Some(dir.path().to_path_buf()),
    };

    let mut phases = Vec::new();
    for _ in 0..5 {
        let outcome = run_invocation(config.clone(), Some("spring"), "hash")
            .await
            .unwrap();
        assert_eq!(outcome.cycle, "spring");
        phases.push(outcome.phase);
    }

    assert_eq!(
        phases,
        vec![
            Phase::Init,
            Phase::Fetching,
            Phase::Merging,
            Phase::Publishing,
            Phase::Done
        ]
    );

    let published = read_artifact(&dir.path().join("published.json")).unwrap();
    assert_eq!(published.get("left"), Some(&7));
    assert_eq!(published.get("right"), Some(&8));
}

/// Answers any point query by name, recording when each request arrived
///
/// The first four-name batch holding `n00` is refused with 403 and the first
/// batch holding `n20` is rate limited once; every other reply is delayed so
/// that workers overlap.
struct SlowApi {
    arrivals: Arc<Mutex<Vec<(Instant, u16)>>>,
    limited: AtomicBool,
}

impl Respond for SlowApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let arrived = Instant::now();
        let last = request.url.path().rsplit('/').next().unwrap_or_default();
        let batch: Vec<&str> = last.split(',').collect();

        let status = if batch.len() == 4 && batch.contains(&"n00") {
            403
        } else if batch.contains(&"n20") && !self.limited.swap(true, Ordering::SeqCst) {
            429
        } else {
            200
        };
        self.arrivals.lock().unwrap().push((arrived, status));

        match status {
            403 => ResponseTemplate::new(403),
            429 => ResponseTemplate::new(429).insert_header("Retry-After", "0.3"),
            _ => {
                let body: serde_json::Map<String, serde_json::Value> = batch
                    .iter()
                    .map(|name| (name.to_string(), json!({"downloads": 1})))
                    .collect();
                ResponseTemplate::new(200)
                    .set_body_json(body)
                    .set_delay(Duration::from_millis(50))
            }
        }
    }
}

#[tokio::test]
async fn test_concurrent_workers_share_cooldown() {
    let mock_server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("GET"))
        .respond_with(SlowApi {
            arrivals: Arc::clone(&arrivals),
            limited: AtomicBool::new(false),
        })
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), &dir, 4);
    config.fetcher.worker_count = 4;
    config.fetcher.min_split_size = 2;
    let universe: Vec<String> = (0..40).map(|i| format!("n{:02}", i)).collect();
    let universe: Vec<&str> = universe.iter().map(String::as_str).collect();
    let mut coord = coordinator(config, open_storage(&dir), &universe, RecordingPublisher::default());

    coord.run().await.unwrap();
    let fetch = coord.run().await.unwrap();

    let report = fetch.fetch.unwrap();
    assert_eq!(fetch.next_phase, Phase::Merging);
    assert!(report.duplicates.is_empty());
    assert_eq!(report.batches_split, 1);
    assert_eq!(report.unexpected_errors, 0);
    // 10 batches, 2 halves, the 429 retry is transparent
    assert_eq!(report.queries, 12);
    assert_eq!(coord.storage().read_shard(CYCLE, 0).unwrap().len(), 40);
    assert_coverage(coord.storage(), &universe, &report.not_found);

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 13);
    let limited_at = arrivals
        .iter()
        .find(|(_, status)| *status == 429)
        .map(|(at, _)| *at)
        .unwrap();

    // Requests already in flight may land just after the 429; nothing new
    // starts until the cooldown has passed
    let quiet_from = limited_at + Duration::from_millis(40);
    let quiet_until = limited_at + Duration::from_millis(290);
    let early: Vec<_> = arrivals
        .iter()
        .filter(|(at, _)| *at > quiet_from && *at < quiet_until)
        .collect();
    assert!(early.is_empty(), "requests during cooldown: {:?}", early);
    assert!(arrivals
        .iter()
        .any(|(at, _)| *at >= limited_at + Duration::from_millis(300)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_invocation_resumes_unpublished_cycle() {
    use download_census::config::month_cycle_name;
    use download_census::run_invocation;

    let mock_server = MockServer::start().await;
    mount_json(
        &mock_server,
        "/downloads/point/last-week/old",
        200,
        json!({"downloads": 3, "package": "old"}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("names.json"), r#"["fresh"]"#).unwrap();
    let config = create_test_config(&mock_server.uri(), &dir, 2);

    // A cycle from an earlier month that never got published
    let mut storage = open_storage(&dir);
    storage
        .save("2000-01", &BuildState::new(vec![], names(&["old"]), vec![]))
        .unwrap();
    drop(storage);

    let mut phases = Vec::new();
    for _ in 0..4 {
        let outcome = run_invocation(config.clone(), None, "hash").await.unwrap();
        assert_eq!(outcome.cycle, "2000-01");
        phases.push(outcome.phase);
    }
    assert_eq!(
        phases,
        vec![Phase::Fetching, Phase::Merging, Phase::Publishing, Phase::Done]
    );

    // Only once that cycle is done does the current month begin
    let outcome = run_invocation(config, None, "hash").await.unwrap();
    assert_eq!(outcome.cycle, month_cycle_name());
    assert_eq!(outcome.phase, Phase::Init);
}

//! Integration tests for the sharded pipeline and write-back
//!
//! Shards run in-process over wiremock-served courses and write into a real
//! SQLite file, except for the last tests which launch shard child processes.

mod common;

use async_trait::async_trait;
use common::*;
use golfrecs_harvest::config::Config;
use golfrecs_harvest::pipeline::{
    InProcessExecutor, Orchestrator, ProcessExecutor, ShardAssignment, ShardExecutor,
    ShardOutcome,
};
use golfrecs_harvest::session::{NoControl, SessionPool};
use golfrecs_harvest::storage::{
    RunStatus, SequenceCounter, SqliteCounter, SqliteStorage, Storage, StorageError,
};
use golfrecs_harvest::{EntityClass, HarvestError};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::MockServer;

const CONFIG_HASH: &str = "test-hash";

/// Two courses of 25 reviews each, with one reviewer on both
async fn mount_two_courses(server: &MockServer) -> Vec<String> {
    let mut pine = reviews("p", 24);
    pine.push(("p-shared".to_string(), "Shared Golfer".to_string()));
    let mut dunes = reviews("d", 24);
    dunes.push(("d-shared".to_string(), "Shared Golfer".to_string()));

    mount_course(server, "/courses/1-pine", "Pine Hollow", &pine).await;
    mount_course(server, "/courses/2-dunes", "The Dunes", &dunes).await;

    vec![
        format!("{}/courses/1-pine", server.uri()),
        format!("{}/courses/2-dunes", server.uri()),
    ]
}

struct Store {
    _dir: TempDir,
    path: PathBuf,
    storage: SqliteStorage,
    counter: SqliteCounter,
}

fn bootstrapped_store() -> Store {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("golfrecs.db");
    let storage = SqliteStorage::new(&path).unwrap();
    let counter = SqliteCounter::open(&path).unwrap();
    counter.bootstrap().unwrap();
    Store {
        _dir: dir,
        path,
        storage,
        counter,
    }
}

fn in_process(config: &Config) -> InProcessExecutor {
    let pool = SessionPool::with_control(config, Arc::new(NoControl)).unwrap();
    InProcessExecutor::new(Arc::new(pool), config.harvest.clone())
}

fn orchestrator(config: &Config) -> Orchestrator<InProcessExecutor> {
    Orchestrator::new(in_process(config), config.circuits.len(), &config.harvest)
}

fn review_page_requests(counts: &[(usize, usize)]) -> usize {
    counts.iter().map(|(_, pages)| pages).sum()
}

#[tokio::test]
async fn test_end_to_end_run_writes_merged_documents() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let mut store = bootstrapped_store();
    let config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);

    let report = orchestrator(&config)
        .run(urls.clone(), &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();

    assert_eq!(report.requested, 2);
    assert_eq!(report.harvested, 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.courses.inserted, 2);
    assert_eq!(report.users.inserted, 49);
    assert_eq!(report.reviews.inserted, 50);
    assert_eq!(report.reviews.orphaned, 0);

    // ceil(25 / 20) = 2 review pages per course
    let counts = [
        request_counts(&server, "/courses/1-pine").await,
        request_counts(&server, "/courses/2-dunes").await,
    ];
    assert_eq!(review_page_requests(&counts), 4);

    // Courses are written in shard order starting at ID 0
    let keys: Vec<&str> = urls.iter().map(String::as_str).collect();
    let ids = store.storage.known_ids(EntityClass::Courses, &keys).unwrap();
    assert_eq!(ids[&urls[0]], 0);
    assert_eq!(ids[&urls[1]], 1);

    assert_eq!(store.storage.count_documents(EntityClass::Users).unwrap(), 49);
    assert_eq!(store.storage.count_documents(EntityClass::Reviews).unwrap(), 50);
    assert_eq!(store.counter.current(EntityClass::Courses).unwrap(), Some(1));
    assert_eq!(store.counter.current(EntityClass::Users).unwrap(), Some(48));

    // The shared reviewer is one user linked to both courses
    let conn = rusqlite::Connection::open(&store.path).unwrap();
    let shared: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT r.course_id) FROM reviews r
             JOIN users u ON u.user_id = r.user_id
             WHERE u.username = 'shared golfer'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(shared, 2);

    let run = store.storage.get_run(report.run_ids[0]).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, CONFIG_HASH);
    assert_eq!(run.counts.courses_harvested, 2);
    assert_eq!(run.counts.users_written, 49);
    assert_eq!(run.counts.reviews_written, 50);
}

#[tokio::test]
async fn test_refresh_rerun_keeps_ids() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let mut store = bootstrapped_store();
    let config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);

    orchestrator(&config)
        .run(urls.clone(), &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();
    let keys: Vec<&str> = urls.iter().map(String::as_str).collect();
    let before = store.storage.known_ids(EntityClass::Courses, &keys).unwrap();

    let report = orchestrator(&config)
        .refresh(true)
        .run(urls.clone(), &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();

    assert_eq!(report.courses.inserted, 0);
    assert_eq!(report.courses.refreshed, 2);
    assert_eq!(report.users.inserted, 0);
    assert_eq!(report.users.refreshed, 49);
    assert_eq!(report.reviews.refreshed, 50);

    let after = store.storage.known_ids(EntityClass::Courses, &keys).unwrap();
    assert_eq!(before, after);
    assert_eq!(store.storage.count_documents(EntityClass::Reviews).unwrap(), 50);
    // No IDs were burned on the second pass
    assert_eq!(store.counter.current(EntityClass::Courses).unwrap(), Some(1));
    assert_eq!(store.counter.current(EntityClass::Users).unwrap(), Some(48));
}

#[tokio::test]
async fn test_rerun_skips_known_courses() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let mut store = bootstrapped_store();
    let config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);

    orchestrator(&config)
        .run(urls.clone(), &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();
    let requests = server.received_requests().await.unwrap().len();

    let report = orchestrator(&config)
        .run(urls, &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();

    assert_eq!(report.requested, 2);
    assert_eq!(report.skipped_known, 2);
    assert_eq!(report.harvested, 0);
    assert!(report.run_ids.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), requests);
}

#[tokio::test]
async fn test_duplicate_urls_are_harvested_once() {
    let server = MockServer::start().await;
    mount_course(&server, "/courses/3-oaks", "Twin Oaks", &reviews("o", 3)).await;
    let url = format!("{}/courses/3-oaks", server.uri());
    let mut store = bootstrapped_store();
    let config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);

    let report = orchestrator(&config)
        .run(
            vec![url.clone(), url.clone()],
            &mut store.storage,
            &store.counter,
            CONFIG_HASH,
        )
        .await
        .unwrap();

    assert_eq!(report.requested, 1);
    assert_eq!(report.courses.inserted, 1);
    assert_eq!(request_counts(&server, "/courses/3-oaks").await, (1, 1));
}

/// Loses every shard but the first
struct LossyExecutor {
    inner: InProcessExecutor,
}

#[async_trait]
impl ShardExecutor for LossyExecutor {
    async fn run_shard(&self, assignment: ShardAssignment) -> Result<ShardOutcome, HarvestError> {
        if assignment.index > 0 {
            return Err(HarvestError::Shard {
                index: assignment.index,
                message: "child exited with signal 9".to_string(),
            });
        }
        self.inner.run_shard(assignment).await
    }
}

#[tokio::test]
async fn test_lost_shard_is_recorded_and_others_written() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let mut store = bootstrapped_store();
    let config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);

    let executor = LossyExecutor {
        inner: in_process(&config),
    };
    let report = Orchestrator::new(executor, 2, &config.harvest)
        .run(urls.clone(), &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();

    assert_eq!(report.harvested, 1);
    assert_eq!(report.courses.inserted, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].url, urls[1]);
    assert_eq!(report.failures[0].kind, "shard");

    let failures = store.storage.get_failures(report.run_ids[0]).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, "shard");
    assert!(failures[0].error.contains("signal 9"));

    let run = store.storage.get_run(report.run_ids[0]).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts.courses_failed, 1);

    // The lost course is retried on the next run
    let keys: Vec<&str> = urls.iter().map(String::as_str).collect();
    let known = store.storage.known_ids(EntityClass::Courses, &keys).unwrap();
    assert!(known.contains_key(&urls[0]));
    assert!(!known.contains_key(&urls[1]));
}

#[tokio::test]
async fn test_batches_become_separate_runs() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let mut store = bootstrapped_store();
    let mut config = test_config(&server.uri(), store.path.to_str().unwrap(), 2);
    config.harvest.batch_size = 1;

    let report = orchestrator(&config)
        .run(urls, &mut store.storage, &store.counter, CONFIG_HASH)
        .await
        .unwrap();

    assert_eq!(report.run_ids.len(), 2);
    assert_eq!(report.courses.inserted, 2);
    // The shared reviewer is new in the first batch and refreshed in the second
    assert_eq!(report.users.inserted, 49);
    assert_eq!(report.users.refreshed, 1);
    for run_id in &report.run_ids {
        let run = store.storage.get_run(*run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counts.courses_requested, 1);
    }
}

#[tokio::test]
async fn test_missing_counters_fail_the_run() {
    let server = MockServer::start().await;
    let urls = mount_two_courses(&server).await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("golfrecs.db");
    let mut storage = SqliteStorage::new(&path).unwrap();
    let counter = SqliteCounter::open(&path).unwrap();
    let config = test_config(&server.uri(), path.to_str().unwrap(), 2);

    let result = orchestrator(&config)
        .run(urls, &mut storage, &counter, CONFIG_HASH)
        .await;

    assert!(matches!(
        result,
        Err(HarvestError::Storage(StorageError::CounterMissing(EntityClass::Courses)))
    ));
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(storage.count_documents(EntityClass::Courses).unwrap(), 0);
}

fn write_config(dir: &TempDir, base_url: &str) -> PathBuf {
    let path = dir.path().join("harvest.toml");
    let toml = format!(
        r#"
[harvest]
sitemap-url = "{base}/sitemap_courses-#.xml"
sitemap-pages = 1
threads-per-shard = 2
reviews-per-page = {per_page}
request-timeout = 5
connect-timeout = 5

[user-agent]
crawler-name = "GolfRecs-Test"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[tor]
rotation-interval = 0

[[circuit]]

[output]
database-path = "{db}"
"#,
        base = base_url,
        per_page = REVIEWS_PER_PAGE,
        db = dir.path().join("golfrecs.db").display()
    );
    std::fs::write(&path, toml).unwrap();
    path
}

#[tokio::test]
async fn test_process_executor_runs_shard_child() {
    let server = MockServer::start().await;
    mount_course(&server, "/courses/4-links", "Links Course", &reviews("l", 21)).await;
    let url = format!("{}/courses/4-links", server.uri());

    let dir = TempDir::new().unwrap();
    let config_path = write_config(&dir, &server.uri());
    let executor = ProcessExecutor::new(env!("CARGO_BIN_EXE_golfrecs-harvest"), config_path)
        .with_args(vec!["--quiet".to_string()]);

    let outcome = executor
        .run_shard(ShardAssignment {
            index: 0,
            urls: vec![url.clone()],
        })
        .await
        .unwrap();

    assert_eq!(outcome.index, 0);
    assert_eq!(outcome.batch.courses.len(), 1);
    assert_eq!(outcome.batch.courses[0].ga_url, url);
    assert_eq!(outcome.batch.reviews.len(), 21);
    assert!(outcome.batch.failures.is_empty());
    assert_eq!(request_counts(&server, "/courses/4-links").await, (1, 2));
}

#[tokio::test]
async fn test_process_executor_reports_failed_child() {
    let dir = TempDir::new().unwrap();
    let executor = ProcessExecutor::new(
        env!("CARGO_BIN_EXE_golfrecs-harvest"),
        dir.path().join("missing.toml"),
    )
    .with_args(vec!["--quiet".to_string()]);

    let result = executor
        .run_shard(ShardAssignment {
            index: 0,
            urls: vec!["https://www.golfadvisor.com/courses/1-a".to_string()],
        })
        .await;

    assert!(matches!(result, Err(HarvestError::Shard { index: 0, .. })));
}

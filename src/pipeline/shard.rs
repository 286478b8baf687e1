//! Shard worker
//!
//! Runs every course of one shard through a single session. A semaphore
//! bounds how many harvests are in flight; they overlap their waiting, while
//! the session itself keeps one request on the circuit at a time.

use crate::config::HarvestConfig;
use crate::harvest::Harvester;
use crate::pipeline::{CourseFailure, HarvestBatch, ShardOutcome};
use crate::session::Session;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct ShardWorker {
    index: usize,
    harvester: Arc<Harvester>,
    threads: usize,
}

impl ShardWorker {
    pub fn new(index: usize, session: Arc<Session>, config: &HarvestConfig) -> Self {
        Self {
            index,
            harvester: Arc::new(Harvester::new(session, config.reviews_per_page)),
            threads: config.threads_per_shard.max(1) as usize,
        }
    }

    /// Harvests every URL and merges the results in input order
    ///
    /// Failed courses become failure records; they never stop their siblings.
    pub async fn run(&self, urls: Vec<String>) -> ShardOutcome {
        tracing::info!(
            "Shard {} starting: {} courses, {} in flight",
            self.index,
            urls.len(),
            self.threads
        );

        let semaphore = Arc::new(Semaphore::new(self.threads));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeMap<usize, String> = BTreeMap::new();

        for (position, url) in urls.into_iter().enumerate() {
            pending.insert(position, url.clone());
            let semaphore = semaphore.clone();
            let harvester = self.harvester.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = harvester.harvest(&url).await;
                (position, url, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, url, result)) => {
                    pending.remove(&position);
                    results.insert(position, (url, result));
                }
                Err(e) => tracing::error!("Harvest task in shard {} died: {}", self.index, e),
            }
        }

        let mut batch = HarvestBatch::default();
        for (url, result) in results.into_values() {
            match result {
                Ok(harvest) => batch.push(harvest),
                Err(e) => {
                    tracing::warn!("Abandoning {}: {}", url, e);
                    batch.fail(CourseFailure::new(url, &e));
                }
            }
        }
        for url in pending.into_values() {
            batch.fail(CourseFailure::shard_lost(url, "harvest task panicked"));
        }
        batch.dedup();

        tracing::info!(
            "Shard {} finished: {} courses, {} failures, {} rotations",
            self.index,
            batch.courses.len(),
            batch.failures.len(),
            self.harvester.session().rotations()
        );

        ShardOutcome {
            index: self.index,
            batch,
        }
    }
}

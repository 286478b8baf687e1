//! Pipeline orchestration
//!
//! A run splits the course list into contiguous shards, launches every shard
//! at once and waits for all of them before merging. Only the merged result
//! is written: courses first, then users, then reviews, so that reviews can
//! be linked to the IDs of both.

use crate::config::HarvestConfig;
use crate::documents::EntityClass;
use crate::pipeline::{CourseFailure, HarvestBatch, ShardAssignment, ShardExecutor};
use crate::storage::{
    DedupWriter, RunCounts, RunStatus, SequenceCounter, Storage, StorageResult, WriteOutcome,
};
use crate::HarvestError;
use futures::future::join_all;
use std::collections::HashSet;

/// Splits `urls` into `shards` contiguous runs of near-equal length
///
/// The first `len % shards` shards get one extra URL. Empty shards are
/// omitted, so fewer URLs than shards yields fewer assignments.
pub fn split_shards(urls: &[String], shards: usize) -> Vec<ShardAssignment> {
    if shards == 0 {
        return Vec::new();
    }

    let base = urls.len() / shards;
    let extra = urls.len() % shards;
    let mut assignments = Vec::with_capacity(shards);
    let mut start = 0;

    for index in 0..shards {
        let len = base + usize::from(index < extra);
        if len > 0 {
            assignments.push(ShardAssignment {
                index,
                urls: urls[start..start + len].to_vec(),
            });
        }
        start += len;
    }

    assignments
}

/// Summary of a whole pipeline invocation
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Runs recorded in the store, one per batch
    pub run_ids: Vec<i64>,
    pub requested: usize,
    pub skipped_known: usize,
    pub harvested: usize,
    pub courses: WriteOutcome,
    pub users: WriteOutcome,
    pub reviews: WriteOutcome,
    pub failures: Vec<CourseFailure>,
}

impl RunReport {
    fn absorb(&mut self, batch: RunReport) {
        self.run_ids.extend(batch.run_ids);
        self.harvested += batch.harvested;
        add_outcome(&mut self.courses, batch.courses);
        add_outcome(&mut self.users, batch.users);
        add_outcome(&mut self.reviews, batch.reviews);
        self.failures.extend(batch.failures);
    }
}

fn add_outcome(total: &mut WriteOutcome, part: WriteOutcome) {
    total.inserted += part.inserted;
    total.refreshed += part.refreshed;
    total.orphaned += part.orphaned;
}

/// Drives sharded harvests and the write-back
pub struct Orchestrator<E: ShardExecutor> {
    executor: E,
    shard_count: usize,
    batch_size: usize,
    skip_known: bool,
}

impl<E: ShardExecutor> Orchestrator<E> {
    pub fn new(executor: E, shard_count: usize, config: &HarvestConfig) -> Self {
        Self {
            executor,
            shard_count,
            batch_size: config.batch_size,
            skip_known: config.skip_known_courses,
        }
    }

    /// Re-harvest courses that are already stored
    pub fn refresh(mut self, refresh: bool) -> Self {
        if refresh {
            self.skip_known = false;
        }
        self
    }

    /// Harvests `urls` across all shards and merges the outcomes
    ///
    /// Returns only after every shard has finished. A shard that fails as a
    /// whole turns each of its URLs into a failure record.
    pub async fn harvest(&self, urls: &[String]) -> HarvestBatch {
        let assignments = split_shards(urls, self.shard_count);
        tracing::info!(
            "Harvesting {} courses across {} shards",
            urls.len(),
            assignments.len()
        );

        let runs = assignments.into_iter().map(|assignment| async move {
            let lost = assignment.urls.clone();
            match self.executor.run_shard(assignment).await {
                Ok(outcome) => outcome.batch,
                Err(e) => {
                    tracing::error!("{}", e);
                    let message = e.to_string();
                    HarvestBatch {
                        failures: lost
                            .into_iter()
                            .map(|url| CourseFailure::shard_lost(url, &message))
                            .collect(),
                        ..Default::default()
                    }
                }
            }
        });

        let mut merged = HarvestBatch::default();
        for batch in join_all(runs).await {
            merged.merge(batch);
        }
        merged
    }

    /// Runs the full pipeline over `urls` and writes the results
    ///
    /// Each batch is recorded as its own run. A storage error marks the
    /// current run failed and stops the pipeline; earlier batches stay
    /// written.
    pub async fn run<S, C>(
        &self,
        urls: Vec<String>,
        storage: &mut S,
        counter: &C,
        config_hash: &str,
    ) -> Result<RunReport, HarvestError>
    where
        S: Storage,
        C: SequenceCounter,
    {
        let mut seen = HashSet::new();
        let mut urls: Vec<String> = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();

        let mut report = RunReport {
            requested: urls.len(),
            ..Default::default()
        };

        if self.skip_known && !urls.is_empty() {
            let keys: Vec<&str> = urls.iter().map(String::as_str).collect();
            let known = storage.known_ids(EntityClass::Courses, &keys)?;
            urls.retain(|u| !known.contains_key(u));
            report.skipped_known = report.requested - urls.len();
            if report.skipped_known > 0 {
                tracing::info!("Skipping {} courses already stored", report.skipped_known);
            }
        }

        let batch_size = if self.batch_size == 0 {
            urls.len().max(1)
        } else {
            self.batch_size
        };

        for (number, chunk) in urls.chunks(batch_size).enumerate() {
            tracing::info!("Batch {}: {} courses", number + 1, chunk.len());

            let run_id = storage.create_run(config_hash)?;
            let batch = self.harvest(chunk).await;

            let mut counts = RunCounts {
                courses_requested: chunk.len() as u64,
                courses_harvested: batch.courses.len() as u64,
                courses_failed: batch.failures.len() as u64,
                ..Default::default()
            };

            match write_batch(storage, counter, run_id, &batch) {
                Ok(written) => {
                    counts.users_written = written.users.written() as u64;
                    counts.reviews_written = written.reviews.written() as u64;
                    counts.reviews_orphaned = written.reviews.orphaned as u64;
                    storage.finish_run(run_id, RunStatus::Completed, &counts)?;

                    report.absorb(RunReport {
                        run_ids: vec![run_id],
                        harvested: batch.courses.len(),
                        failures: batch.failures,
                        ..written
                    });
                }
                Err(e) => {
                    tracing::error!("Write-back for run {} failed: {}", run_id, e);
                    if let Err(mark) = storage.finish_run(run_id, RunStatus::Failed, &counts) {
                        tracing::warn!("Could not mark run {} failed: {}", run_id, mark);
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            "Pipeline finished: {} harvested, {} failed, {} new courses, {} new users, {} new reviews",
            report.harvested,
            report.failures.len(),
            report.courses.inserted,
            report.users.inserted,
            report.reviews.inserted
        );
        Ok(report)
    }
}

fn write_batch<S: Storage, C: SequenceCounter>(
    storage: &mut S,
    counter: &C,
    run_id: i64,
    batch: &HarvestBatch,
) -> StorageResult<RunReport> {
    for failure in &batch.failures {
        storage.record_failure(run_id, &failure.url, &failure.kind, &failure.error)?;
    }

    let mut writer = DedupWriter::new(storage, counter);
    let courses = writer.write(batch.courses.clone())?;
    let users = writer.write(batch.users.clone())?;
    let reviews = writer.write_reviews(batch.reviews.clone())?;

    Ok(RunReport {
        courses,
        users,
        reviews,
        ..Default::default()
    })
}

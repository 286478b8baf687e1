//! Statistics from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! store statistics from the storage layer.

use crate::documents::EntityClass;
use crate::storage::{FailureRecord, RunRecord, Storage};
use crate::HarvestError;

/// Store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    pub courses: u64,
    pub users: u64,
    pub reviews: u64,

    /// Sequence counters (entity, last allocated ID)
    pub counters: Vec<(String, i64)>,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Failures recorded by the most recent run
    pub latest_failures: Vec<FailureRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<StoreStatistics, HarvestError> {
    let latest_run = storage.get_latest_run()?;
    let latest_failures = match &latest_run {
        Some(run) => storage.get_failures(run.id)?,
        None => Vec::new(),
    };

    Ok(StoreStatistics {
        courses: storage.count_documents(EntityClass::Courses)?,
        users: storage.count_documents(EntityClass::Users)?,
        reviews: storage.count_documents(EntityClass::Reviews)?,
        counters: storage.counter_values()?,
        latest_run,
        latest_failures,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Documents:");
    println!("  Courses: {}", stats.courses);
    println!("  Users: {}", stats.users);
    println!("  Reviews: {}", stats.reviews);
    println!();

    println!("Counters:");
    if stats.counters.is_empty() {
        println!("  (none; run with --bootstrap)");
    }
    for (entity, seq) in &stats.counters {
        println!("  {}: {}", entity, seq);
    }
    println!();

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run (#{}):", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Courses: {} requested, {} harvested, {} failed",
                run.counts.courses_requested, run.counts.courses_harvested, run.counts.courses_failed
            );
            println!(
                "  Written: {} users, {} reviews ({} orphaned)",
                run.counts.users_written, run.counts.reviews_written, run.counts.reviews_orphaned
            );
        }
        None => println!("No runs recorded"),
    }

    if !stats.latest_failures.is_empty() {
        println!();
        println!("Failures ({}):", stats.latest_failures.len());
        for failure in &stats.latest_failures {
            println!("  - [{}] {}: {}", failure.kind, failure.url, failure.error);
        }
    }
}

//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::documents::EntityClass;
use crate::storage::{FailureRecord, ReviewRow, RunCounts, RunRecord, RunStatus, StoredDocument};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    /// The counter backend is unusable; fatal for the whole process
    #[error("Sequence counter for {0} is missing; run with --bootstrap first")]
    CounterMissing(EntityClass),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all document store operations needed by the pipeline.
/// ID allocation is not part of it; see `SequenceCounter`.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new pipeline run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run finished with its final status and tallies
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts)
        -> StorageResult<()>;

    /// Records a course that could not be harvested
    fn record_failure(&mut self, run_id: i64, url: &str, kind: &str, error: &str)
        -> StorageResult<()>;

    /// Gets all failures recorded for a run
    fn get_failures(&self, run_id: i64) -> StorageResult<Vec<FailureRecord>>;

    // ===== Documents =====

    /// Looks up the IDs of natural keys already present
    ///
    /// Keys that are not stored are simply absent from the result.
    fn known_ids(&self, entity: EntityClass, keys: &[&str]) -> StorageResult<HashMap<String, i64>>;

    /// Inserts or refreshes documents in one transaction
    ///
    /// A natural key that is already present keeps its ID; only the document
    /// body is replaced. Returns the number of rows written.
    fn upsert_documents(
        &mut self,
        entity: EntityClass,
        documents: &[StoredDocument],
    ) -> StorageResult<usize>;

    /// Source review ids already present
    fn known_review_ids(&self, review_ids: &[&str]) -> StorageResult<HashSet<String>>;

    /// Inserts or refreshes reviews in one transaction
    fn upsert_reviews(&mut self, reviews: &[ReviewRow]) -> StorageResult<usize>;

    // ===== Statistics =====

    /// Counts stored documents of an entity class
    fn count_documents(&self, entity: EntityClass) -> StorageResult<u64>;

    /// Current value of every sequence counter
    fn counter_values(&self) -> StorageResult<Vec<(String, i64)>>;
}

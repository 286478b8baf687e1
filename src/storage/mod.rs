//! Storage module for persisting harvested documents
//!
//! This module handles all database operations for the pipeline, including:
//! - SQLite database initialization and schema management
//! - Natural-key lookups and idempotent document upserts
//! - The per-entity sequence counters that allocate integer IDs
//! - Run tracking and per-course failure records

mod counter;
mod schema;
mod sqlite;
mod traits;
mod writer;

pub use counter::{SequenceCounter, SqliteCounter};
pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};
pub use writer::{DedupWriter, WriteOutcome};

use crate::HarvestError;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// A document ready to be upserted: natural key, stamped ID and JSON body
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub key: String,
    pub id: i64,
    pub doc: String,
}

/// A review row with its references resolved
#[derive(Debug, Clone)]
pub struct ReviewRow {
    pub review_id: Option<String>,
    pub course_id: i64,
    pub user_id: i64,
    pub rating: f32,
    pub doc: String,
}

/// Represents a pipeline run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// Tallies recorded when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub courses_requested: u64,
    pub courses_harvested: u64,
    pub courses_failed: u64,
    pub users_written: u64,
    pub reviews_written: u64,
    pub reviews_orphaned: u64,
}

/// One course that could not be harvested during a run
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub run_id: i64,
    pub url: String,
    pub kind: String,
    pub error: String,
    pub recorded_at: String,
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

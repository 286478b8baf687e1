//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::documents::EntityClass;
use crate::storage::schema::{entity_columns, initialize_schema};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    FailureRecord, ReviewRow, RunCounts, RunRecord, RunStatus, StoredDocument,
};
use crate::HarvestError;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a lock held by another process
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest `IN (...)` list sent in one statement
const LOOKUP_CHUNK: usize = 500;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, \
    courses_requested, courses_harvested, courses_failed, \
    users_written, reviews_written, reviews_orphaned";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = init_database(path)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], row_to_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        Ok(self.conn.query_row(&sql, [], row_to_run).optional()?)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2,
                courses_requested = ?3, courses_harvested = ?4, courses_failed = ?5,
                users_written = ?6, reviews_written = ?7, reviews_orphaned = ?8
             WHERE id = ?9",
            params![
                status.to_db_string(),
                now,
                counts.courses_requested as i64,
                counts.courses_harvested as i64,
                counts.courses_failed as i64,
                counts.users_written as i64,
                counts.reviews_written as i64,
                counts.reviews_orphaned as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn record_failure(
        &mut self,
        run_id: i64,
        url: &str,
        kind: &str,
        error: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO harvest_failures (run_id, url, kind, error, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, url, kind, error, now],
        )?;
        Ok(())
    }

    fn get_failures(&self, run_id: i64) -> StorageResult<Vec<FailureRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, url, kind, error, recorded_at FROM harvest_failures
             WHERE run_id = ?1 ORDER BY id",
        )?;

        let failures = stmt
            .query_map(params![run_id], |row| {
                Ok(FailureRecord {
                    run_id: row.get(0)?,
                    url: row.get(1)?,
                    kind: row.get(2)?,
                    error: row.get(3)?,
                    recorded_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(failures)
    }

    // ===== Documents =====

    fn known_ids(&self, entity: EntityClass, keys: &[&str]) -> StorageResult<HashMap<String, i64>> {
        let (table, key_column, id_column) = entity_columns(entity);
        let mut found = HashMap::new();

        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {key}, {id} FROM {table} WHERE {key} IN ({placeholders})",
                key = key_column,
                id = id_column,
                table = table,
                placeholders = placeholders
            );

            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (key, id) = row?;
                found.insert(key, id);
            }
        }

        Ok(found)
    }

    fn upsert_documents(
        &mut self,
        entity: EntityClass,
        documents: &[StoredDocument],
    ) -> StorageResult<usize> {
        let (table, key_column, id_column) = entity_columns(entity);
        // A key that raced in from another writer keeps the stored ID, and the
        // document body is re-stamped with it
        let sql = format!(
            "INSERT INTO {table} ({id}, {key}, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT({key}) DO UPDATE SET doc = json_set(excluded.doc, ?4, {table}.{id})",
            table = table,
            id = id_column,
            key = key_column
        );
        let id_path = id_json_path(entity);

        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for document in documents {
                written += stmt.execute(params![document.id, document.key, document.doc, id_path])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    fn known_review_ids(&self, review_ids: &[&str]) -> StorageResult<HashSet<String>> {
        Ok(self
            .known_ids(EntityClass::Reviews, review_ids)?
            .into_keys()
            .collect())
    }

    fn upsert_reviews(&mut self, reviews: &[ReviewRow]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            // NULL review ids never conflict, so id-less reviews always insert
            let mut stmt = tx.prepare(
                "INSERT INTO reviews (review_id, course_id, user_id, rating, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(review_id) DO UPDATE SET
                    course_id = excluded.course_id,
                    user_id = excluded.user_id,
                    rating = excluded.rating,
                    doc = excluded.doc",
            )?;
            for review in reviews {
                written += stmt.execute(params![
                    review.review_id,
                    review.course_id,
                    review.user_id,
                    review.rating as f64,
                    review.doc
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    // ===== Statistics =====

    fn count_documents(&self, entity: EntityClass) -> StorageResult<u64> {
        let (table, _, _) = entity_columns(entity);
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn counter_values(&self) -> StorageResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entity, seq FROM counters ORDER BY entity")?;
        let values = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

fn id_json_path(entity: EntityClass) -> &'static str {
    match entity {
        EntityClass::Courses => "$.\"Course Id\"",
        EntityClass::Users => "$.\"User Id\"",
        EntityClass::Reviews => "$.\"Review Id\"",
    }
}

fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
    let count = |idx: usize| row.get::<_, i64>(idx).map(|v| v.max(0) as u64);

    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        counts: RunCounts {
            courses_requested: count(5)?,
            courses_harvested: count(6)?,
            courses_failed: count(7)?,
            users_written: count(8)?,
            reviews_written: count(9)?,
            reviews_orphaned: count(10)?,
        },
    })
}

/// Initializes a new database at the given path
///
/// Opens the file in WAL mode with a busy timeout so that concurrent
/// pipelines and the web application can share it.
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

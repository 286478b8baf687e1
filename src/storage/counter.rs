//! Sequence counters for integer ID allocation
//!
//! Each counted entity class has one row in `counters`. Allocation is a single
//! `UPDATE ... RETURNING` statement, so concurrent pipelines sharing the
//! database file can never hand out the same ID twice. Counters are created
//! once by bootstrap, seeded from the highest stored ID, and afterwards only
//! incremented.

use crate::documents::EntityClass;
use crate::storage::schema::{entity_columns, initialize_schema};
use crate::storage::sqlite::BUSY_TIMEOUT;
use crate::storage::traits::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Hands out unique, monotonically increasing IDs per entity class
pub trait SequenceCounter {
    /// Atomically increments the counter and returns the new value
    fn next(&self, entity: EntityClass) -> StorageResult<i64>;

    /// Last value handed out, or the seed if none was
    fn current(&self, entity: EntityClass) -> StorageResult<Option<i64>>;
}

/// Counter backed by the `counters` table
pub struct SqliteCounter {
    conn: Connection,
}

impl SqliteCounter {
    /// Opens its own connection to the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Creates any missing counter, seeded from the highest stored ID
    ///
    /// Existing counters are left untouched. A class with no stored documents
    /// is seeded with -1 so its first allocated ID is 0. Returns the value of
    /// every counter after seeding.
    pub fn bootstrap(&self) -> StorageResult<Vec<(EntityClass, i64)>> {
        let mut values = Vec::new();

        for entity in EntityClass::counted() {
            let (table, _, id_column) = entity_columns(entity);
            let sql = format!(
                "INSERT OR IGNORE INTO counters (entity, seq)
                 SELECT ?1, COALESCE(MAX({id}), -1) FROM {table}",
                id = id_column,
                table = table
            );
            let created = self.conn.execute(&sql, params![entity.as_str()])?;

            let seq = self.current(entity)?.ok_or(StorageError::CounterMissing(entity))?;
            if created > 0 {
                tracing::info!("Seeded {} counter at {}", entity, seq);
            }
            values.push((entity, seq));
        }

        Ok(values)
    }
}

impl SequenceCounter for SqliteCounter {
    fn next(&self, entity: EntityClass) -> StorageResult<i64> {
        self.conn
            .query_row(
                "UPDATE counters SET seq = seq + 1 WHERE entity = ?1 RETURNING seq",
                params![entity.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::CounterMissing(entity))
    }

    fn current(&self, entity: EntityClass) -> StorageResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT seq FROM counters WHERE entity = ?1",
                params![entity.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

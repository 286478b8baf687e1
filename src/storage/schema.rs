//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvest database.

use crate::documents::EntityClass;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track pipeline runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    courses_requested INTEGER NOT NULL DEFAULT 0,
    courses_harvested INTEGER NOT NULL DEFAULT 0,
    courses_failed INTEGER NOT NULL DEFAULT 0,
    users_written INTEGER NOT NULL DEFAULT 0,
    reviews_written INTEGER NOT NULL DEFAULT 0,
    reviews_orphaned INTEGER NOT NULL DEFAULT 0
);

-- Courses that could not be harvested in a run
CREATE TABLE IF NOT EXISTS harvest_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    url TEXT NOT NULL,
    kind TEXT NOT NULL,
    error TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_harvest_failures_run ON harvest_failures(run_id);

-- Course documents keyed by their GA Url
CREATE TABLE IF NOT EXISTS courses (
    course_id INTEGER PRIMARY KEY,
    ga_url TEXT NOT NULL UNIQUE,
    doc TEXT NOT NULL
);

-- User documents keyed by normalized username
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    doc TEXT NOT NULL
);

-- Reviews; rows without a source id are never deduplicated
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review_id TEXT UNIQUE,
    course_id INTEGER NOT NULL REFERENCES courses(course_id),
    user_id INTEGER NOT NULL REFERENCES users(user_id),
    rating REAL NOT NULL,
    doc TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_course ON reviews(course_id);
CREATE INDEX IF NOT EXISTS idx_reviews_user ON reviews(user_id);

-- One sequence per entity class; only ever incremented
CREATE TABLE IF NOT EXISTS counters (
    entity TEXT PRIMARY KEY,
    seq INTEGER NOT NULL
);
"#;

/// Table, natural-key column and ID column of an entity class
pub fn entity_columns(entity: EntityClass) -> (&'static str, &'static str, &'static str) {
    match entity {
        EntityClass::Courses => ("courses", "ga_url", "course_id"),
        EntityClass::Users => ("users", "username", "user_id"),
        EntityClass::Reviews => ("reviews", "review_id", "id"),
    }
}

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

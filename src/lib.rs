//! GolfRecs harvest: course, user and review ingestion for the recommender
//!
//! This crate scrapes course pages and their paginated reviews through a pool
//! of proxy-bound HTTP sessions, fans the work out over shard processes, and
//! persists the merged documents with stable integer IDs.

pub mod config;
pub mod documents;
pub mod harvest;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod storage;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Shard {index} failed: {message}")]
    Shard { index: usize, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use documents::{CourseDocument, EntityClass, ReviewDocument, UserDocument};
pub use harvest::{CourseError, FetchError, ParseError};

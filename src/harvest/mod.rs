//! Harvest module for fetching and parsing course pages
//!
//! This module contains the per-course scraping logic, including:
//! - Fetching one page through a session and classifying the outcome
//! - Parsing course pages and review pages into documents
//! - Walking every review page of one course
//! - Discovering course URLs from the sitemap

mod fetcher;
mod harvester;
mod parser;
mod reviews;
mod sitemap;

pub use fetcher::{fetch, RawPage};
pub use harvester::{fetch_with_retry, page_count, page_url, CourseHarvest, Harvester};
pub use parser::parse_course_page;
pub use reviews::{parse_review_page, ParsedReview, Reviewer};
pub use sitemap::{discover_courses, parse_sitemap, sitemap_page_urls};

use thiserror::Error;

/// Why a fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response body")]
    EmptyBody,
}

/// Transport or HTTP failure; retryable once after rotating the circuit
#[derive(Debug, Clone, Error)]
#[error("fetch of {url} on circuit {session_index} failed: {kind}")]
pub struct FetchError {
    pub url: String,
    pub session_index: usize,
    /// Circuit generation the request went out on
    pub generation: u64,
    pub kind: FetchErrorKind,
}

/// Structurally invalid page; fatal for the course, never retried
#[derive(Debug, Clone, Error)]
#[error("could not parse {url}: {message}")]
pub struct ParseError {
    pub url: String,
    pub message: String,
}

impl ParseError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Failure that abandons one course without touching its siblings
#[derive(Debug, Clone, Error)]
pub enum CourseError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl CourseError {
    /// Short label stored with failure records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
        }
    }
}

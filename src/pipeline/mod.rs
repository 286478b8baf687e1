//! Pipeline module: sharding, shard workers and the merge/write-back
//!
//! The full course list is split into one contiguous shard per session. Each
//! shard runs in its own process (or task, in tests) and reports a
//! `ShardOutcome`; the orchestrator waits for every shard, merges the
//! outcomes once and hands the result to the dedup writer.

mod executor;
mod orchestrator;
mod shard;

pub use executor::{InProcessExecutor, ProcessExecutor, ShardExecutor};
pub use orchestrator::{split_shards, Orchestrator, RunReport};
pub use shard::ShardWorker;

use crate::documents::{CourseDocument, Document, ReviewDocument, UserDocument};
use crate::harvest::{CourseError, CourseHarvest};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Work handed to one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardAssignment {
    /// Shard index, which is also the circuit index
    pub index: usize,
    pub urls: Vec<String>,
}

/// A course that was abandoned, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseFailure {
    pub url: String,
    /// `fetch`, `parse` or `shard`
    pub kind: String,
    pub error: String,
}

impl CourseFailure {
    pub fn new(url: impl Into<String>, error: &CourseError) -> Self {
        Self {
            url: url.into(),
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }

    /// Failure for a course whose whole shard was lost
    pub fn shard_lost(url: impl Into<String>, message: &str) -> Self {
        Self {
            url: url.into(),
            kind: "shard".to_string(),
            error: message.to_string(),
        }
    }
}

/// Documents and failures gathered by one or more shards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestBatch {
    pub courses: Vec<CourseDocument>,
    pub users: Vec<UserDocument>,
    pub reviews: Vec<ReviewDocument>,
    pub failures: Vec<CourseFailure>,
}

impl HarvestBatch {
    pub fn push(&mut self, harvest: CourseHarvest) {
        self.courses.push(harvest.course);
        self.users.extend(harvest.users);
        self.reviews.extend(harvest.reviews);
    }

    pub fn fail(&mut self, failure: CourseFailure) {
        self.failures.push(failure);
    }

    /// Appends another batch, then restores the merge invariants
    pub fn merge(&mut self, other: HarvestBatch) {
        self.courses.extend(other.courses);
        self.users.extend(other.users);
        self.reviews.extend(other.reviews);
        self.failures.extend(other.failures);
        self.dedup();
    }

    /// Collapses duplicates in place, keeping first-seen order
    ///
    /// Courses keep their first copy, users are folded together, and reviews
    /// with a source id keep their first copy. Id-less reviews all stay.
    pub fn dedup(&mut self) {
        let mut seen_courses = HashSet::new();
        self.courses
            .retain(|course| seen_courses.insert(course.ga_url.clone()));

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut users: Vec<UserDocument> = Vec::with_capacity(self.users.len());
        for user in self.users.drain(..) {
            match index.get(user.natural_key()) {
                Some(&at) => users[at].absorb(user),
                None => {
                    index.insert(user.username.clone(), users.len());
                    users.push(user);
                }
            }
        }
        self.users = users;

        let mut seen_reviews = HashSet::new();
        self.reviews.retain(|review| match &review.review_id {
            Some(id) => seen_reviews.insert(id.clone()),
            None => true,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.failures.is_empty()
    }
}

/// What a shard reports back to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardOutcome {
    pub index: usize,
    #[serde(flatten)]
    pub batch: HarvestBatch,
}

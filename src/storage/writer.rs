//! Identity-assigning, deduplicating writer
//!
//! Writing a batch of documents of one entity class:
//! 1. collapse duplicates inside the batch by natural key
//! 2. look up which natural keys the store already knows
//! 3. stamp known documents with their stored ID
//! 4. allocate a fresh ID for each remaining document
//! 5. upsert everything in one transaction
//!
//! Lookup happens before allocation so re-running over overlapping input
//! never burns IDs on entities already seen.

use crate::documents::{Document, EntityClass, ReviewDocument};
use crate::storage::counter::SequenceCounter;
use crate::storage::traits::{Storage, StorageResult};
use crate::storage::{ReviewRow, StoredDocument};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// What one write did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents new to the store
    pub inserted: usize,
    /// Documents already present whose body was refreshed
    pub refreshed: usize,
    /// Reviews dropped because their course or user is unknown
    pub orphaned: usize,
}

impl WriteOutcome {
    pub fn written(&self) -> usize {
        self.inserted + self.refreshed
    }
}

/// Writes documents through a store and a sequence counter
pub struct DedupWriter<'a, S: Storage, C: SequenceCounter> {
    storage: &'a mut S,
    counter: &'a C,
}

impl<'a, S: Storage, C: SequenceCounter> DedupWriter<'a, S, C> {
    pub fn new(storage: &'a mut S, counter: &'a C) -> Self {
        Self { storage, counter }
    }

    /// Writes counted documents, allocating IDs only for unseen natural keys
    pub fn write<D: Document + Serialize>(&mut self, documents: Vec<D>) -> StorageResult<WriteOutcome> {
        let documents = collapse(documents);
        if documents.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let keys: Vec<&str> = documents.iter().map(Document::natural_key).collect();
        let known = self.storage.known_ids(D::ENTITY, &keys)?;

        let mut outcome = WriteOutcome::default();
        let mut rows = Vec::with_capacity(documents.len());

        for mut document in documents {
            match known.get(document.natural_key()) {
                Some(&id) => {
                    document.set_id(id);
                    outcome.refreshed += 1;
                }
                None => {
                    let id = self.counter.next(D::ENTITY)?;
                    document.set_id(id);
                    outcome.inserted += 1;
                }
            }

            rows.push(StoredDocument {
                key: document.natural_key().to_string(),
                id: document.id().unwrap_or_default(),
                doc: serde_json::to_string(&document)?,
            });
        }

        self.storage.upsert_documents(D::ENTITY, &rows)?;

        tracing::info!(
            "Wrote {}: {} new, {} refreshed",
            D::ENTITY,
            outcome.inserted,
            outcome.refreshed
        );
        Ok(outcome)
    }

    /// Writes reviews once their courses and users are stored
    ///
    /// References are resolved against the store; reviews that point at an
    /// unknown course or user are counted as orphaned and skipped. Reviews
    /// with a source id are refreshed in place on repeat runs; reviews
    /// without one are always inserted.
    pub fn write_reviews(&mut self, reviews: Vec<ReviewDocument>) -> StorageResult<WriteOutcome> {
        let mut seen = HashSet::new();
        let reviews: Vec<ReviewDocument> = reviews
            .into_iter()
            .filter(|r| match &r.review_id {
                Some(id) => seen.insert(id.clone()),
                None => true,
            })
            .collect();
        if reviews.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let course_ids = self.resolve(EntityClass::Courses, reviews.iter().map(|r| r.course_url.as_str()))?;
        let user_ids = self.resolve(EntityClass::Users, reviews.iter().map(|r| r.username.as_str()))?;

        let sourced: Vec<&str> = reviews.iter().filter_map(|r| r.review_id.as_deref()).collect();
        let known_reviews = self.storage.known_review_ids(&sourced)?;

        let mut outcome = WriteOutcome::default();
        let mut rows = Vec::with_capacity(reviews.len());

        for mut review in reviews {
            let (Some(&course_id), Some(&user_id)) = (
                course_ids.get(&review.course_url),
                user_ids.get(&review.username),
            ) else {
                tracing::debug!(
                    "Orphaned review by {:?} on {}",
                    review.username,
                    review.course_url
                );
                outcome.orphaned += 1;
                continue;
            };

            review.course_id = Some(course_id);
            review.user_id = Some(user_id);

            match &review.review_id {
                Some(id) if known_reviews.contains(id) => outcome.refreshed += 1,
                _ => outcome.inserted += 1,
            }

            rows.push(ReviewRow {
                review_id: review.review_id.clone(),
                course_id,
                user_id,
                rating: review.rating,
                doc: serde_json::to_string(&review)?,
            });
        }

        self.storage.upsert_reviews(&rows)?;

        tracing::info!(
            "Wrote {}: {} new, {} refreshed, {} orphaned",
            EntityClass::Reviews,
            outcome.inserted,
            outcome.refreshed,
            outcome.orphaned
        );
        Ok(outcome)
    }

    fn resolve<'k>(
        &self,
        entity: EntityClass,
        keys: impl Iterator<Item = &'k str>,
    ) -> StorageResult<HashMap<String, i64>> {
        let unique: HashSet<&str> = keys.collect();
        let keys: Vec<&str> = unique.into_iter().collect();
        self.storage.known_ids(entity, &keys)
    }
}

/// Folds documents sharing a natural key into the first occurrence
fn collapse<D: Document>(documents: Vec<D>) -> Vec<D> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut collapsed: Vec<D> = Vec::with_capacity(documents.len());

    for document in documents {
        match index.get(document.natural_key()) {
            Some(&at) => collapsed[at].absorb(document),
            None => {
                index.insert(document.natural_key().to_string(), collapsed.len());
                collapsed.push(document);
            }
        }
    }

    collapsed
}

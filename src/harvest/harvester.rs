//! Per-course harvesting
//!
//! One harvest fetches the course root page, derives the number of review
//! pages from the declared review count, then walks `url?page=1..=N`. Every
//! fetch gets at most one retry, after rotating the session's circuit, and so
//! does a root page that does not parse. Any failure abandons the course as a
//! whole; partial results are dropped.

use crate::documents::{normalize_username, CourseDocument, Document, ReviewDocument, UserDocument};
use crate::harvest::fetcher::{fetch, RawPage};
use crate::harvest::parser::parse_course_page;
use crate::harvest::reviews::{parse_review_page, ParsedReview};
use crate::harvest::{CourseError, FetchError, ParseError};
use crate::session::Session;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Everything harvested from one course
#[derive(Debug, Clone)]
pub struct CourseHarvest {
    pub course: CourseDocument,
    pub users: Vec<UserDocument>,
    pub reviews: Vec<ReviewDocument>,
}

/// Number of review pages for a declared review count
pub fn page_count(review_count: u32, reviews_per_page: u32) -> u32 {
    let per_page = reviews_per_page.max(1);
    review_count.div_ceil(per_page).max(1)
}

/// Review page `page` of a course (`<url>?page=<n>`)
pub fn page_url(course_url: &str, page: u32) -> Result<String, ParseError> {
    let mut url = Url::parse(course_url)
        .map_err(|e| ParseError::new(course_url, format!("invalid course URL: {}", e)))?;
    url.set_query(Some(&format!("page={}", page)));
    Ok(url.into())
}

/// Fetches `url`, rotating the circuit and retrying once on failure
///
/// The rotation targets the generation the failed request actually used.
pub async fn fetch_with_retry(session: &Session, url: &str) -> Result<RawPage, FetchError> {
    match fetch(session, url).await {
        Ok(page) => {
            after_success(session).await;
            Ok(page)
        }
        Err(first) => {
            tracing::warn!("{}; rotating circuit and retrying", first);
            rotate_away(session, first.generation).await;
            refetch(session, url).await
        }
    }
}

async fn rotate_away(session: &Session, generation: u64) {
    if let Err(e) = session.rotate_from(generation).await {
        tracing::warn!("Rotation of circuit {} failed: {}", session.index(), e);
    }
}

async fn refetch(session: &Session, url: &str) -> Result<RawPage, FetchError> {
    let page = fetch(session, url).await?;
    after_success(session).await;
    Ok(page)
}

async fn after_success(session: &Session) {
    if session.record_success() {
        tracing::debug!("Circuit {} reached its request budget", session.index());
        if let Err(e) = session.rotate().await {
            tracing::warn!("Proactive rotation of circuit {} failed: {}", session.index(), e);
        }
    }
}

/// Harvests whole courses through one session
#[derive(Debug, Clone)]
pub struct Harvester {
    session: Arc<Session>,
    reviews_per_page: u32,
}

impl Harvester {
    pub fn new(session: Arc<Session>, reviews_per_page: u32) -> Self {
        Self {
            session,
            reviews_per_page,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Fetches and parses the course root page and all its review pages
    pub async fn harvest(&self, course_url: &str) -> Result<CourseHarvest, CourseError> {
        let course = self.fetch_course(course_url).await?;

        let pages = page_count(course.review_count, self.reviews_per_page);
        tracing::debug!(
            "{} declares {} reviews across {} pages",
            course_url,
            course.review_count,
            pages
        );

        let mut users: BTreeMap<String, UserDocument> = BTreeMap::new();
        let mut reviews = Vec::new();

        for page in 1..=pages {
            let url = page_url(course_url, page)?;
            let raw = fetch_with_retry(&self.session, &url).await?;

            for parsed in parse_review_page(&raw.body, &raw.final_url) {
                let (user, review) = into_documents(course_url, parsed);
                if user.username.is_empty() {
                    continue;
                }
                match users.get_mut(user.natural_key()) {
                    Some(existing) => existing.absorb(user),
                    None => {
                        users.insert(user.username.clone(), user);
                    }
                }
                reviews.push(review);
            }
        }

        tracing::info!(
            "Harvested {} ({} reviews, {} reviewers)",
            course.name,
            reviews.len(),
            users.len()
        );

        Ok(CourseHarvest {
            course,
            users: users.into_values().collect(),
            reviews,
        })
    }

    /// Root page fetch and parse
    ///
    /// A 200 page without the course name or review count is usually a block
    /// page served to a flagged circuit, so it gets the same single
    /// rotate-and-refetch as a failed request.
    async fn fetch_course(&self, course_url: &str) -> Result<CourseDocument, CourseError> {
        let root = fetch_with_retry(&self.session, course_url).await?;
        match parse_course_page(&root.body, course_url) {
            Ok(course) => Ok(course),
            Err(first) => {
                tracing::warn!("{}; rotating circuit and refetching", first);
                rotate_away(&self.session, root.generation).await;
                let root = refetch(&self.session, course_url).await?;
                Ok(parse_course_page(&root.body, course_url)?)
            }
        }
    }
}

fn into_documents(course_url: &str, parsed: ParsedReview) -> (UserDocument, ReviewDocument) {
    let username = normalize_username(&parsed.reviewer.display_name);

    let user = UserDocument {
        username: username.clone(),
        user_id: None,
        display_name: parsed.reviewer.display_name,
        profile_url: parsed.reviewer.profile_url,
        attributes: parsed.reviewer.attributes,
        badges: parsed.reviewer.badges,
    };

    let review = ReviewDocument {
        review_id: parsed.review_id,
        course_url: course_url.to_string(),
        course_id: None,
        username,
        user_id: None,
        rating: parsed.rating,
        title: parsed.title,
        played_on: parsed.played_on,
        text: parsed.text,
        sub_ratings: parsed.sub_ratings,
        labels: parsed.labels,
    };

    (user, review)
}

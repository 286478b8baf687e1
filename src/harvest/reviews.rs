//! Review page parsing
//!
//! A review page lists up to one page worth of review blocks. Each block
//! carries the review itself plus a reviewer panel: the display name, an
//! optional profile link, reviewer badges and `Key:` / value attribute pairs.
//! Blocks without a rating or reviewer name are skipped rather than failing
//! the page.

use crate::documents::SubRatings;
use crate::harvest::parser::{select_all, select_first, text_of};
use scraper::{ElementRef, Html};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// Reviewer panel attached to one review
#[derive(Debug, Clone, PartialEq)]
pub struct Reviewer {
    pub display_name: String,
    /// Absolute profile link when the panel has one
    pub profile_url: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub badges: BTreeSet<String>,
}

/// One review block
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReview {
    pub review_id: Option<String>,
    pub rating: f32,
    pub title: Option<String>,
    pub played_on: Option<String>,
    pub text: String,
    pub sub_ratings: SubRatings,
    pub labels: BTreeSet<String>,
    pub reviewer: Reviewer,
}

/// Parses every review block on a page
pub fn parse_review_page(html: &str, page_url: &str) -> Vec<ParsedReview> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    select_all(document.root_element(), "[itemprop='review']")
        .into_iter()
        .filter_map(|block| {
            let parsed = parse_block(block, base.as_ref());
            if parsed.is_none() {
                tracing::debug!("Skipping incomplete review block on {}", page_url);
            }
            parsed
        })
        .collect()
}

fn parse_block(block: ElementRef, base: Option<&Url>) -> Option<ParsedReview> {
    let rating = select_first(block, "[itemprop='ratingValue']").and_then(|el| {
        el.value()
            .attr("content")
            .map(str::to_string)
            .unwrap_or_else(|| text_of(el))
            .trim()
            .parse::<f32>()
            .ok()
    })?;

    let reviewer = parse_reviewer(block, base)?;

    let text = select_all(block, ".review-body p")
        .into_iter()
        .map(text_of)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let text = if text.is_empty() {
        select_first(block, "[itemprop='reviewBody']")
            .map(text_of)
            .unwrap_or_default()
    } else {
        text
    };

    Some(ParsedReview {
        review_id: review_id(block),
        rating,
        title: select_first(block, "[itemprop='name']")
            .map(text_of)
            .filter(|t| !t.is_empty()),
        played_on: select_first(block, ".review-play-date")
            .map(text_of)
            .filter(|t| !t.is_empty()),
        text,
        sub_ratings: parse_sub_ratings(block),
        labels: select_all(block, ".label")
            .into_iter()
            .map(text_of)
            .filter(|l| !l.is_empty())
            .collect(),
        reviewer,
    })
}

/// Source id from `id="review-<n>"` on the block or its inner row
fn review_id(block: ElementRef) -> Option<String> {
    let raw = block
        .value()
        .id()
        .or_else(|| select_first(block, "[id^='review']").and_then(|el| el.value().id()))?;

    let id = match raw.split_once('-') {
        Some((_, tail)) => tail,
        None => raw,
    };
    (!id.is_empty()).then(|| id.to_string())
}

fn parse_sub_ratings(block: ElementRef) -> SubRatings {
    let mut ratings = SubRatings::default();

    let cells: Vec<String> = select_all(block, ".review-secondary-ratings span")
        .into_iter()
        .map(|span| {
            span.text()
                .collect::<String>()
                .trim_matches(|c: char| c == ':' || c.is_whitespace())
                .to_string()
        })
        .collect();

    for pair in cells.chunks_exact(2) {
        if let Ok(value) = pair[1].parse::<f32>() {
            if !ratings.set(&pair[0], value) {
                tracing::trace!("Ignoring unknown sub-rating {:?}", pair[0]);
            }
        }
    }

    ratings
}

fn parse_reviewer(block: ElementRef, base: Option<&Url>) -> Option<Reviewer> {
    let panel = select_first(block, ".bv_review_user_details")?;

    let spans: Vec<String> = select_all(panel, "span")
        .into_iter()
        .map(text_of)
        .filter(|s| !s.is_empty())
        .collect();
    let (display_name, rest) = spans.split_first()?;

    let profile_url = select_first(panel, "a[href]")
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| match base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        });

    let first_key = rest.iter().position(|s| s.ends_with(':')).unwrap_or(rest.len());
    let badges = rest[..first_key].iter().cloned().collect();

    let mut attributes = BTreeMap::new();
    let mut i = first_key;
    while i < rest.len() {
        let key = rest[i].trim_end_matches(':').trim();
        match rest.get(i + 1) {
            Some(value) if !value.ends_with(':') && rest[i].ends_with(':') => {
                attributes.insert(key.to_string(), value.clone());
                i += 2;
            }
            _ => i += 1,
        }
    }

    Some(Reviewer {
        display_name: display_name.clone(),
        profile_url,
        attributes,
        badges,
    })
}

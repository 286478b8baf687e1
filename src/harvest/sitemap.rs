//! Course discovery from the site's paged sitemap
//!
//! The sitemap URL carries a `#` placeholder for the page number. Pages are
//! spread across the session pool, page `n` (counting from 1) going to
//! circuit `n mod P`.

use crate::harvest::harvester::fetch_with_retry;
use crate::harvest::parser::{select_all, text_of};
use crate::session::SessionPool;
use futures::future::join_all;
use scraper::Html;
use std::collections::HashSet;
use url::Url;

/// Expands the `#` placeholder into the URLs of pages `1..=pages`
pub fn sitemap_page_urls(pattern: &str, pages: u32) -> Vec<String> {
    (1..=pages)
        .map(|page| pattern.replace('#', &page.to_string()))
        .collect()
}

/// Extracts the `<loc>` entries of one sitemap page
pub fn parse_sitemap(xml: &str) -> Vec<String> {
    let document = Html::parse_document(xml);
    select_all(document.root_element(), "loc")
        .into_iter()
        .map(text_of)
        .filter(|loc| {
            Url::parse(loc)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false)
        })
        .collect()
}

/// Fetches every sitemap page and returns the course URLs in page order
///
/// A page that fails after its retry is logged and skipped; discovery keeps
/// whatever the other pages yield. Duplicates keep their first position.
pub async fn discover_courses(pool: &SessionPool, pattern: &str, pages: u32) -> Vec<String> {
    if pool.is_empty() {
        return Vec::new();
    }

    let fetches = sitemap_page_urls(pattern, pages)
        .into_iter()
        .enumerate()
        .map(|(n, url)| async move {
            let session = pool.acquire((n + 1) % pool.len()).ok()?;
            match fetch_with_retry(&session, &url).await {
                Ok(page) => Some(parse_sitemap(&page.body)),
                Err(e) => {
                    tracing::error!("Skipping sitemap page {}: {}", url, e);
                    None
                }
            }
        });

    let mut seen = HashSet::new();
    let courses: Vec<String> = join_all(fetches)
        .await
        .into_iter()
        .flatten()
        .flatten()
        .filter(|url| seen.insert(url.clone()))
        .collect();

    tracing::info!("Discovered {} courses from {} sitemap pages", courses.len(), pages);
    courses
}

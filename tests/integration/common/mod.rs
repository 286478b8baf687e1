//! Shared fixtures for the integration tests
//!
//! Course and review pages are rendered in the site's markup and served from
//! a wiremock server, one mock per review page.

#![allow(dead_code)]

use golfrecs_harvest::config::{
    CircuitConfig, Config, HarvestConfig, OutputConfig, TorConfig, UserAgentConfig,
};
use golfrecs_harvest::session::{ClientSettings, NoControl, Session};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REVIEWS_PER_PAGE: usize = 20;

/// Creates a test configuration pointing at `base_url`
pub fn test_config(base_url: &str, db_path: &str, circuits: usize) -> Config {
    Config {
        harvest: HarvestConfig {
            sitemap_url: format!("{}/sitemap_courses-#.xml", base_url),
            sitemap_pages: 1,
            threads_per_shard: 2,
            reviews_per_page: REVIEWS_PER_PAGE as u32,
            batch_size: 0,
            skip_known_courses: true,
            request_timeout: 5,
            connect_timeout: 5,
        },
        user_agent: UserAgentConfig {
            crawler_name: "GolfRecs-Test".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        tor: TorConfig {
            control_address: None,
            control_password: None,
            rotation_interval: 0,
            rotate_after_requests: 0,
        },
        circuits: vec![CircuitConfig::default(); circuits],
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
    }
}

/// A direct (proxy-less) session with no rotation spacing
pub fn direct_session(index: usize, rotate_after_requests: u32) -> Arc<Session> {
    let settings = ClientSettings {
        user_agent: "GolfRecs-Test/1.0.0 (+https://example.com/contact; test@example.com)"
            .to_string(),
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        rotation_interval: Duration::ZERO,
        rotate_after_requests,
        identity_seed: 0,
    };
    Arc::new(Session::new(index, None, settings, Arc::new(NoControl)).unwrap())
}

/// Root page of a course
pub fn course_page(name: &str, review_count: usize) -> String {
    format!(
        r#"<html><body>
          <h1 itemprop="name">{name}</h1>
          <span itemprop="reviewCount">({review_count})</span>
          <ul class="course-essential-info-top"><li>Holes: 18</li><li>Par: 72</li></ul>
          <div id="more"><div class="col-sm-4"><div>Driving Range: Yes</div></div></div>
        </body></html>"#
    )
}

/// One review block by `user`
pub fn review_block(review_id: &str, user: &str) -> String {
    format!(
        r#"<div itemprop="review"><div class="row" id="review-{review_id}">
             <div class="bv_review_user_details col-xs-8 col-sm-12">
               <a href="/members/{review_id}"><span>{user}</span></a>
               <span>Handicap:</span><span>10</span>
             </div>
             <span itemprop="ratingValue">4</span>
             <span itemprop="name">Review {review_id}</span>
             <div class="review-body"><p>Solid course.</p></div>
           </div></div>"#
    )
}

/// A review page holding the given blocks
pub fn review_page(blocks: &[String]) -> String {
    format!("<html><body>{}</body></html>", blocks.concat())
}

/// Mounts a course at `course_path` with one review per `(review id, user)`
pub async fn mount_course(
    server: &MockServer,
    course_path: &str,
    name: &str,
    reviews: &[(String, String)],
) {
    Mock::given(method("GET"))
        .and(path(course_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(course_page(name, reviews.len())))
        .mount(server)
        .await;

    let pages = reviews.len().div_ceil(REVIEWS_PER_PAGE).max(1);
    for page in 1..=pages {
        let blocks: Vec<String> = reviews
            .iter()
            .skip((page - 1) * REVIEWS_PER_PAGE)
            .take(REVIEWS_PER_PAGE)
            .map(|(id, user)| review_block(id, user))
            .collect();

        Mock::given(method("GET"))
            .and(path(course_path))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(review_page(&blocks)))
            .with_priority(1)
            .mount(server)
            .await;
    }
}

/// `count` reviews with ids `<prefix>0..` by distinct users
pub fn reviews(prefix: &str, count: usize) -> Vec<(String, String)> {
    (0..count)
        .map(|i| (format!("{}{}", prefix, i), format!("Golfer {}{}", prefix, i)))
        .collect()
}

/// Requests received for `course_path`, split into (root, review pages)
pub async fn request_counts(server: &MockServer, course_path: &str) -> (usize, usize) {
    let requests = server.received_requests().await.unwrap_or_default();
    let mut root = 0;
    let mut pages = 0;
    for request in requests.iter().filter(|r| r.url.path() == course_path) {
        match request.url.query() {
            Some(query) if query.starts_with("page=") => pages += 1,
            _ => root += 1,
        }
    }
    (root, pages)
}

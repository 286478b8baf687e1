//! Integration tests for per-course harvesting
//!
//! These tests serve course and review pages from wiremock and drive the
//! harvester through a real session.

mod common;

use common::*;
use golfrecs_harvest::harvest::{discover_courses, fetch_with_retry, FetchErrorKind, Harvester};
use golfrecs_harvest::session::{NoControl, SessionPool};
use golfrecs_harvest::CourseError;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pagination_fetches_each_review_page() {
    let server = MockServer::start().await;
    mount_course(&server, "/courses/1-pine", "Pine Hollow", &reviews("p", 45)).await;

    let session = direct_session(0, 0);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    let harvest = harvester
        .harvest(&format!("{}/courses/1-pine", server.uri()))
        .await
        .unwrap();

    assert_eq!(harvest.course.name, "Pine Hollow");
    assert_eq!(harvest.course.review_count, 45);
    assert_eq!(harvest.course.ga_id, Some(1));
    assert_eq!(harvest.reviews.len(), 45);
    assert_eq!(harvest.users.len(), 45);

    let (root, pages) = request_counts(&server, "/courses/1-pine").await;
    assert_eq!(root, 1);
    assert_eq!(pages, 3);
    assert_eq!(session.rotations(), 0);
}

#[tokio::test]
async fn test_course_without_reviews_fetches_one_page() {
    let server = MockServer::start().await;
    mount_course(&server, "/courses/2-empty", "Empty Links", &[]).await;

    let harvester = Harvester::new(direct_session(0, 0), REVIEWS_PER_PAGE as u32);
    let harvest = harvester
        .harvest(&format!("{}/courses/2-empty", server.uri()))
        .await
        .unwrap();

    assert!(harvest.reviews.is_empty());
    assert!(harvest.users.is_empty());
    assert_eq!(request_counts(&server, "/courses/2-empty").await, (1, 1));
}

#[tokio::test]
async fn test_reviews_carry_course_and_user_keys() {
    let server = MockServer::start().await;
    let reviewers = vec![
        ("10".to_string(), "Pat  Smith".to_string()),
        ("11".to_string(), "pat smith".to_string()),
    ];
    mount_course(&server, "/courses/3-dunes", "The Dunes", &reviewers).await;

    let url = format!("{}/courses/3-dunes", server.uri());
    let harvester = Harvester::new(direct_session(0, 0), REVIEWS_PER_PAGE as u32);
    let harvest = harvester.harvest(&url).await.unwrap();

    // Both spellings normalize to one reviewer
    assert_eq!(harvest.users.len(), 1);
    assert_eq!(harvest.users[0].username, "pat smith");
    assert_eq!(harvest.reviews.len(), 2);
    assert!(harvest
        .reviews
        .iter()
        .all(|r| r.course_url == url && r.username == "pat smith"));
    assert_eq!(harvest.reviews[0].review_id.as_deref(), Some("10"));
}

#[tokio::test]
async fn test_retry_after_rotation_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/4-oaks"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_course(&server, "/courses/4-oaks", "Twin Oaks", &reviews("o", 3)).await;

    let session = direct_session(0, 0);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    let harvest = harvester
        .harvest(&format!("{}/courses/4-oaks", server.uri()))
        .await
        .unwrap();

    assert_eq!(harvest.reviews.len(), 3);
    assert_eq!(session.rotations(), 1);
    assert_eq!(request_counts(&server, "/courses/4-oaks").await, (2, 1));
}

#[tokio::test]
async fn test_second_failure_abandons_course() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/5-closed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let session = direct_session(2, 0);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    let result = harvester
        .harvest(&format!("{}/courses/5-closed", server.uri()))
        .await;

    match result {
        Err(CourseError::Fetch(e)) => {
            assert_eq!(e.kind, FetchErrorKind::Status(503));
            assert_eq!(e.session_index, 2);
        }
        other => panic!("expected fetch failure, got {:?}", other.map(|h| h.course)),
    }
    assert_eq!(session.rotations(), 1);
    assert_eq!(request_counts(&server, "/courses/5-closed").await, (2, 0));
}

#[tokio::test]
async fn test_failing_review_page_abandons_course() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/6-split"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_course(&server, "/courses/6-split", "Split Decision", &reviews("s", 30)).await;

    let harvester = Harvester::new(direct_session(0, 0), REVIEWS_PER_PAGE as u32);
    let result = harvester
        .harvest(&format!("{}/courses/6-split", server.uri()))
        .await;

    assert!(matches!(result, Err(CourseError::Fetch(_))));
    // Page 1 once, page 2 twice
    assert_eq!(request_counts(&server, "/courses/6-split").await, (1, 3));
}

const BLOCK_PAGE: &str = "<html><body><h2>Access denied</h2></body></html>";

#[tokio::test]
async fn test_block_page_is_refetched_on_a_new_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/7-blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BLOCK_PAGE))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_course(&server, "/courses/7-blocked", "Gatehouse Links", &reviews("g", 4)).await;

    let session = direct_session(0, 0);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    let harvest = harvester
        .harvest(&format!("{}/courses/7-blocked", server.uri()))
        .await
        .unwrap();

    assert_eq!(harvest.course.name, "Gatehouse Links");
    assert_eq!(harvest.reviews.len(), 4);
    assert_eq!(session.rotations(), 1);
    assert_eq!(request_counts(&server, "/courses/7-blocked").await, (2, 1));
}

#[tokio::test]
async fn test_second_block_page_abandons_course() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/7-broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BLOCK_PAGE))
        .mount(&server)
        .await;

    let session = direct_session(0, 0);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    let result = harvester
        .harvest(&format!("{}/courses/7-broken", server.uri()))
        .await;

    assert!(matches!(result, Err(CourseError::Parse(_))));
    assert_eq!(session.rotations(), 1);
    assert_eq!(request_counts(&server, "/courses/7-broken").await, (2, 0));
}

#[tokio::test]
async fn test_retry_rotates_the_generation_that_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/9-down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let url = format!("{}/courses/9-down", server.uri());

    let session = direct_session(0, 0);
    let circuit = session.lock_circuit().await;
    let task = tokio::spawn({
        let session = session.clone();
        async move { fetch_with_retry(&session, &url).await }
    });

    // A sibling rotates while the fetch is still queued on the circuit
    tokio::task::yield_now().await;
    session.rotate().await.unwrap();
    drop(circuit);

    let error = task.await.unwrap().unwrap_err();
    assert_eq!(error.kind, FetchErrorKind::Status(503));
    assert_eq!(error.generation, 2);
    assert_eq!(session.rotations(), 2);
    assert_eq!(request_counts(&server, "/courses/9-down").await, (2, 0));
}

#[tokio::test]
async fn test_proactive_rotation_after_request_budget() {
    let server = MockServer::start().await;
    mount_course(&server, "/courses/8-busy", "Busy Muni", &reviews("b", 5)).await;

    // Root plus one review page reaches the budget of two
    let session = direct_session(0, 2);
    let harvester = Harvester::new(session.clone(), REVIEWS_PER_PAGE as u32);
    harvester
        .harvest(&format!("{}/courses/8-busy", server.uri()))
        .await
        .unwrap();

    assert_eq!(session.rotations(), 1);
}

#[tokio::test]
async fn test_sitemap_discovery_skips_failed_pages() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/sitemap_courses-1.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<urlset>
                 <url><loc>{base}/courses/1-a</loc></url>
                 <url><loc>{base}/courses/2-b</loc></url>
               </urlset>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_courses-2.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap_courses-3.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<urlset>
                 <url><loc>{base}/courses/2-b</loc></url>
                 <url><loc>{base}/courses/3-c</loc></url>
               </urlset>"#
        )))
        .mount(&server)
        .await;

    let config = test_config(&base, "unused.db", 2);
    let pool = SessionPool::with_control(&config, Arc::new(NoControl)).unwrap();
    let courses = discover_courses(&pool, &config.harvest.sitemap_url, 3).await;

    assert_eq!(
        courses,
        vec![
            format!("{}/courses/1-a", base),
            format!("{}/courses/2-b", base),
            format!("{}/courses/3-c", base),
        ]
    );
    // Page 2 went to circuit 0, which rotated once before giving up
    assert_eq!(pool.acquire(0).unwrap().rotations(), 1);
    assert_eq!(pool.acquire(1).unwrap().rotations(), 0);
}

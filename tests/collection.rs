//! Integration tests for collection passes against mocked upstreams.
//!
//! Each test runs a real `Monitor` over an in-memory database, with feeds
//! served by wiremock.

use newsdesk::collect::{Fetcher, RetryPolicy};
use newsdesk::monitor::{Monitor, Trigger};
use newsdesk::storage::{ArticleQuery, Database, NewSource, SourceKind};
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| format!("<item><title>{title}</title><link>{link}</link></item>"))
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>{items}</channel></rss>"#)
}

fn fetcher() -> Fetcher {
    Fetcher::new(Duration::from_secs(5))
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        })
}

async fn add_source(db: &Database, name: &str, kind: SourceKind, url: String) -> i64 {
    db.create_source(&NewSource {
        name: name.to_string(),
        kind,
        url,
        enabled: true,
        config: None,
    })
    .await
    .unwrap()
    .id
}

fn all_articles() -> ArticleQuery {
    ArticleQuery {
        search: None,
        category: None,
        source_id: None,
        exported: None,
        limit: 100,
        offset: 0,
    }
}

// ============================================================================
// Dedup across sources and passes
// ============================================================================

#[tokio::test]
async fn test_same_url_from_two_sources_is_stored_once() {
    let server = MockServer::start().await;
    for route in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
                ("Shared story", "https://news.example/shared"),
                (route, &format!("https://news.example{}", route)),
            ])))
            .mount(&server)
            .await;
    }

    let db = Database::open(":memory:").await.unwrap();
    add_source(&db, "one", SourceKind::Rss, format!("{}/one", server.uri())).await;
    add_source(&db, "two", SourceKind::Rss, format!("{}/two", server.uri())).await;

    let monitor = Monitor::new(db.clone(), fetcher(), None, 1);
    let report = monitor.collect_all(Trigger::Manual).await.unwrap().unwrap();

    assert_eq!(report.sources_processed, 2);
    assert_eq!(report.total_fetched, 4);
    assert_eq!(report.total_collected, 3);

    let (_, total) = db.query_articles(&all_articles()).await.unwrap();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_second_pass_collects_nothing_new() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
            ("A", "https://news.example/a"),
            ("B", "https://news.example/b"),
        ])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let sid = add_source(&db, "feed", SourceKind::Rss, format!("{}/feed", server.uri())).await;
    let monitor = Monitor::new(db.clone(), fetcher(), None, 2);

    let first = monitor.collect_all(Trigger::Manual).await.unwrap().unwrap();
    assert_eq!(first.total_collected, 2);

    let second = monitor.collect_all(Trigger::Manual).await.unwrap().unwrap();
    assert_eq!(second.total_fetched, 2);
    assert_eq!(second.total_collected, 0);

    let source = db.get_source(sid).await.unwrap().unwrap();
    assert!(source.last_fetched.is_some());
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failing_source_does_not_stop_the_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&[("Good", "https://news.example/good")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let good = add_source(&db, "good", SourceKind::Rss, format!("{}/good", server.uri())).await;
    let bad = add_source(&db, "bad", SourceKind::Rss, format!("{}/bad", server.uri())).await;

    let monitor = Monitor::new(db.clone(), fetcher(), None, 2);
    let report = monitor.collect_all(Trigger::Manual).await.unwrap().unwrap();

    assert_eq!(report.total_collected, 1);
    let good_result = report.results.iter().find(|r| r.source_id == good).unwrap();
    assert!(good_result.errors.is_empty());
    let bad_result = report.results.iter().find(|r| r.source_id == bad).unwrap();
    assert_eq!(bad_result.new, 0);
    assert!(!bad_result.errors.is_empty());
}

#[tokio::test]
async fn test_disabled_sources_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(rss(&[("A", "https://news.example/a")])),
        )
        .expect(0)
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    db.create_source(&NewSource {
        name: "off".to_string(),
        kind: SourceKind::Rss,
        url: format!("{}/feed", server.uri()),
        enabled: false,
        config: None,
    })
    .await
    .unwrap();

    let monitor = Monitor::new(db, fetcher(), None, 2);
    let report = monitor.collect_all(Trigger::Manual).await.unwrap().unwrap();
    assert_eq!(report.sources_processed, 0);
    assert_eq!(report.total_collected, 0);
}

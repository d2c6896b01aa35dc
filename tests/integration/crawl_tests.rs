//! Integration tests for the scrape engine
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! scrape cycle end-to-end against a SQLite database in a temp directory.

use ripple_scrape::config::{load_config, Config};
use ripple_scrape::crawler::crawl;
use ripple_scrape::state::QueueStatus;
use ripple_scrape::storage::{ResourceStore, SqliteStorage, WorkQueue};
use ripple_scrape::{ConfigError, CrawlError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Writes a project config for `seed` and loads it back
///
/// Limits are loosened so a local mock server is scraped quickly.
fn create_test_config(dir: &TempDir, seed: &str, extra: &str) -> (Config, PathBuf) {
    let db_path = dir.path().join("scrape.db");
    let config_path = dir.path().join("project.toml");
    let toml = format!(
        r#"
[project]
name = "integration"
database-path = "{db}"
seeds = ["{seed}"]
{extra}

[concurrency]
check-interval-floor-ms = 10
completion-grace-ms = 0

[concurrency.proxy]
max-requests = 4
delay = 10

[concurrency.domain]
max-requests = 4
delay = 10

[[pipeline]]
name = "fetch"

[[pipeline]]
name = "extract-urls"

[[pipeline]]
name = "extract-content"
options = {{ selectors = ["h1"] }}

[[pipeline]]
name = "insert-resources"

[[pipeline]]
name = "upsert-resource"
"#,
        db = db_path.display(),
        seed = seed,
        extra = extra,
    );
    std::fs::write(&config_path, toml).expect("Failed to write config");

    let config = load_config(&config_path).expect("Failed to load config");
    (config, db_path)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_raw(
            format!(
                "<html><head><title>Test</title></head><body>{}</body></html>",
                body
            ),
            "text/html",
        )
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<h1>Home</h1><a href="/page1">Page 1</a><a href="/moved">Moved</a>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(r#"<h1>Page 1</h1><a href="/missing">Broken</a>"#))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/page2"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html("<h1>Page 2</h1>"))
        .mount(server)
        .await;
}

fn status_of(storage: &SqliteStorage, url: &str) -> QueueStatus {
    storage
        .find_entry(url)
        .expect("Failed to query queue")
        .unwrap_or_else(|| panic!("{} is not queued", url))
        .status
}

fn open(db_path: &Path) -> SqliteStorage {
    SqliteStorage::new(db_path).expect("Failed to open database")
}

#[tokio::test]
async fn test_full_scrape_single_site() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let base = server.uri();

    let dir = TempDir::new().unwrap();
    let (config, db_path) = create_test_config(&dir, &format!("{}/", base), "");

    let summary = crawl(&config).await.expect("Scrape failed");
    assert_eq!(summary.scraped, 3, "home, page1 and the moved page");
    assert_eq!(summary.failed, 1, "the broken link");

    let storage = open(&db_path);
    assert_eq!(status_of(&storage, &format!("{}/", base)), QueueStatus::Terminal(200));
    assert_eq!(status_of(&storage, &format!("{}/page1", base)), QueueStatus::Terminal(200));
    assert_eq!(status_of(&storage, &format!("{}/moved", base)), QueueStatus::Terminal(301));
    assert_eq!(status_of(&storage, &format!("{}/page2", base)), QueueStatus::Terminal(200));
    assert_eq!(status_of(&storage, &format!("{}/missing", base)), QueueStatus::Terminal(404));
    assert_eq!(storage.count().await.unwrap(), 5);

    // The redirect stub is not stored as a resource; its target is
    assert_eq!(storage.count_resources().await.unwrap(), 3);
    assert!(storage
        .load_resource(&format!("{}/moved", base))
        .await
        .unwrap()
        .is_none());

    let page2 = storage
        .load_resource(&format!("{}/page2", base))
        .await
        .unwrap()
        .expect("page2 was not stored");
    assert_eq!(page2.depth, 1);
    assert_eq!(page2.content.get("h1"), Some(["Page 2".to_string()].as_slice()));
    assert_eq!(
        page2.parent.and_then(|p| p.link_text).as_deref(),
        Some("Moved")
    );
}

#[tokio::test]
async fn test_second_run_resumes_without_rescraping() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let (config, db_path) = create_test_config(&dir, &format!("{}/", server.uri()), "");

    crawl(&config).await.expect("First scrape failed");
    let summary = crawl(&config).await.expect("Second scrape failed");

    assert_eq!(summary.scraped, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(open(&db_path).count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_max_depth_stops_discovery() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let (config, db_path) =
        create_test_config(&dir, &format!("{}/", server.uri()), "max-depth = 0");

    let summary = crawl(&config).await.expect("Scrape failed");
    assert_eq!(summary.scraped, 1);
    assert_eq!(open(&db_path).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cross_domain_links_are_not_queued() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="https://elsewhere.invalid/">Away</a>"#))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (config, db_path) = create_test_config(&dir, &format!("{}/", server.uri()), "");

    let summary = crawl(&config).await.expect("Scrape failed");
    assert_eq!(summary.scraped, 1);
    assert_eq!(open(&db_path).count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_step_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (mut config, _db_path) = create_test_config(&dir, "https://example.com/", "");
    config.pipeline[0].name = "screenshot".to_string();

    let result = crawl(&config).await;
    assert!(matches!(
        result,
        Err(CrawlError::Config(ConfigError::UnknownStep(name))) if name == "screenshot"
    ));
}

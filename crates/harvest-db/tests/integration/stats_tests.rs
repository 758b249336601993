use chrono::Duration;
use harvest_core::models::CrawlLogEntry;

use crate::integration::common::{day, record, setup_test_db};

fn log_entry(source_id: &str, target: &str, found: u64, new: u64) -> CrawlLogEntry {
    CrawlLogEntry {
        source_id: source_id.to_string(),
        target: target.to_string(),
        items_found: found,
        items_new: new,
        started_at: day(2024, 5, 1),
        finished_at: day(2024, 5, 1) + Duration::minutes(3),
    }
}

#[tokio::test]
async fn overall_stats_group_by_source() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "a"),
        record("threads", "2", day(2024, 4, 1), "b"),
        record("ddg", "3", day(2024, 2, 1), "c"),
    ])
    .await
    .unwrap();

    let stats = repo.stats(None).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_source["threads"], 2);
    assert_eq!(stats.by_source["ddg"], 1);
    assert_eq!(stats.latest_by_source["threads"], Some(day(2024, 4, 1)));
    assert_eq!(stats.latest_by_source["ddg"], Some(day(2024, 2, 1)));
}

#[tokio::test]
async fn scoped_stats_for_one_source() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "a"),
        record("ddg", "2", day(2024, 2, 1), "b"),
    ])
    .await
    .unwrap();

    let stats = repo.stats(Some("threads")).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_source.len(), 1);
    assert_eq!(stats.latest_by_source["threads"], Some(day(2024, 1, 1)));
}

#[tokio::test]
async fn scoped_stats_for_unknown_source_are_zero() {
    let repo = setup_test_db().await;

    let stats = repo.stats(Some("web")).await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.by_source["web"], 0);
    assert_eq!(stats.latest_by_source["web"], None);

    let overall = repo.stats(None).await.unwrap();
    assert_eq!(overall.total, 0);
    assert!(overall.by_source.is_empty());
}

#[tokio::test]
async fn crawl_history_newest_first() {
    let repo = setup_test_db().await;
    repo.log_crawl(&log_entry("threads", "https://www.threads.net/@a", 10, 4))
        .await
        .unwrap();
    repo.log_crawl(&log_entry("ddg", "rust sqlite", 5, 5)).await.unwrap();
    repo.log_crawl(&log_entry("threads", "https://www.threads.net/@b", 0, 0))
        .await
        .unwrap();

    let history = repo.crawl_history(None, 10).await.unwrap();
    let targets: Vec<&str> = history.iter().map(|e| e.target.as_str()).collect();
    assert_eq!(
        targets,
        vec![
            "https://www.threads.net/@b",
            "rust sqlite",
            "https://www.threads.net/@a"
        ]
    );
    assert_eq!(history[2], log_entry("threads", "https://www.threads.net/@a", 10, 4));

    let threads_only = repo.crawl_history(Some("threads"), 1).await.unwrap();
    assert_eq!(threads_only.len(), 1);
    assert_eq!(threads_only[0].target, "https://www.threads.net/@b");
}

#[tokio::test]
async fn health_check_succeeds() {
    let repo = setup_test_db().await;
    repo.health_check().await.unwrap();
}

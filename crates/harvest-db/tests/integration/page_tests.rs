use chrono::Duration;
use harvest_core::models::{Page, PageFilter};

use crate::integration::common::{day, setup_test_db};

fn page(url: &str, source_id: &str, body: &str, day_offset: i64) -> Page {
    Page {
        url: url.to_string(),
        source_id: source_id.to_string(),
        title: Some(format!("Title of {url}")),
        body: body.to_string(),
        fetched_at: day(2024, 1, 1) + Duration::days(day_offset),
    }
}

#[tokio::test]
async fn refetch_replaces_page() {
    let repo = setup_test_db().await;

    assert!(repo.upsert_page(&page("https://a.example", "web", "v1", 0)).await.unwrap());

    let mut replacement = page("https://a.example", "web", "v2", 1);
    replacement.title = None;
    assert!(!repo.upsert_page(&replacement).await.unwrap());

    let stored = repo.get_page("https://a.example").await.unwrap().unwrap();
    assert_eq!(stored, replacement);
    assert_eq!(
        repo.query_pages(&PageFilter::default(), 10, 0).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn unknown_url_is_none() {
    let repo = setup_test_db().await;
    assert!(repo.get_page("https://missing.example").await.unwrap().is_none());
}

#[tokio::test]
async fn pages_listed_most_recent_first() {
    let repo = setup_test_db().await;
    repo.upsert_page(&page("https://a.example", "web", "a", 0)).await.unwrap();
    repo.upsert_page(&page("https://b.example", "web", "b", 2)).await.unwrap();
    repo.upsert_page(&page("https://c.example", "docs", "c", 1)).await.unwrap();

    let all = repo.query_pages(&PageFilter::default(), 10, 0).await.unwrap();
    let urls: Vec<&str> = all.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://b.example", "https://c.example", "https://a.example"]
    );

    let web = repo
        .query_pages(
            &PageFilter {
                source_id: Some("web".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(web.len(), 2);

    let one = repo
        .query_pages(
            &PageFilter {
                url: Some("https://c.example".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].source_id, "docs");

    let paged = repo.query_pages(&PageFilter::default(), 1, 1).await.unwrap();
    assert_eq!(paged[0].url, "https://c.example");
}

use crate::integration::common::{day, record, setup_test_db};

#[tokio::test]
async fn finds_substring_in_cjk_text() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "今天天氣很好，我們去公園散步"),
        record("threads", "2", day(2024, 1, 2), "明天會下雨"),
    ])
    .await
    .unwrap();

    let hits = repo.search("去公園", None, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "1");
}

#[tokio::test]
async fn short_query_falls_back_to_substring_match() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "下雨天"),
        record("threads", "2", day(2024, 1, 2), "晴天"),
        record("threads", "3", day(2024, 1, 3), "多雲"),
    ])
    .await
    .unwrap();

    let hits = repo.search("天", None, 10).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1"]);

    let hits = repo.search("下雨", None, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn results_are_newest_first_and_limited() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "a", day(2024, 1, 1), "rust release notes"),
        record("threads", "b", day(2024, 3, 1), "another rust post"),
        record("threads", "c", day(2024, 2, 1), "rust meetup"),
    ])
    .await
    .unwrap();

    let hits = repo.search("rust", None, 2).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test]
async fn search_scoped_to_source() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "sqlite tips"),
        record("ddg", "2", day(2024, 1, 2), "sqlite tips"),
    ])
    .await
    .unwrap();

    let hits = repo.search("sqlite", Some("ddg"), 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_id, "ddg");
}

#[tokio::test]
async fn query_syntax_is_matched_literally() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "cats AND dogs"),
        record("threads", "2", day(2024, 1, 2), "cats or dogs"),
        record("threads", "3", day(2024, 1, 3), "100% sure"),
        record("threads", "4", day(2024, 1, 4), "1000 sure"),
    ])
    .await
    .unwrap();

    let hits = repo.search("cats AND", None, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "1");

    let hits = repo.search("\"quoted\"", None, 10).await.unwrap();
    assert!(hits.is_empty());

    let hits = repo.search("0%", None, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "3");
}

#[tokio::test]
async fn edited_text_is_reindexed() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[record("threads", "1", day(2024, 1, 1), "original wording")])
        .await
        .unwrap();
    repo.upsert_records(&[record("threads", "1", day(2024, 1, 1), "revised wording")])
        .await
        .unwrap();

    assert!(repo.search("original", None, 10).await.unwrap().is_empty());
    assert_eq!(repo.search("revised", None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn records_without_text_never_match() {
    let repo = setup_test_db().await;
    let bare = harvest_core::models::Record::new("1", "threads", "https://x", day(2024, 1, 1));
    repo.upsert_records(&[bare]).await.unwrap();

    assert!(repo.search("https", None, 10).await.unwrap().is_empty());
    assert!(repo.search("x", None, 10).await.unwrap().is_empty());
}

use harvest_core::models::{Record, RecordFilter};
use harvest_db::{Database, DatabaseConfig};

use crate::integration::common::{day, record, setup_test_db};

#[tokio::test]
async fn upsert_is_idempotent() {
    let repo = setup_test_db().await;
    let batch = vec![
        record("threads", "1", day(2024, 1, 1), "first"),
        record("threads", "2", day(2024, 1, 2), "second"),
        record("threads", "2", day(2024, 1, 2), "second again"),
    ];

    assert_eq!(repo.upsert_records(&batch).await.unwrap(), 2);
    assert_eq!(repo.upsert_records(&batch).await.unwrap(), 0);

    let stored = repo
        .query_records(&RecordFilter::default(), 100, 0)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn update_keeps_original_timestamp() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "old", day(2024, 1, 1), "original"),
        record("threads", "new", day(2024, 6, 1), "newest"),
    ])
    .await
    .unwrap();

    // Same key, changed text and a different observed timestamp.
    let changed = record("threads", "old", day(2024, 12, 1), "edited")
        .with_attribute("like_count", serde_json::json!(42));
    assert_eq!(repo.upsert_records(&[changed]).await.unwrap(), 0);

    let stored = repo
        .query_records(&RecordFilter::default(), 10, 0)
        .await
        .unwrap();
    let old = stored.iter().find(|r| r.id == "old").unwrap();
    assert_eq!(old.text.as_deref(), Some("edited"));
    assert_eq!(old.timestamp, day(2024, 1, 1));
    assert_eq!(old.attributes["like_count"], 42);

    assert_eq!(
        repo.latest_timestamp("threads", None).await.unwrap(),
        Some(day(2024, 6, 1))
    );
}

#[tokio::test]
async fn latest_timestamp_and_ordering_scenario() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "A"),
        record("threads", "2", day(2024, 6, 1), "B"),
    ])
    .await
    .unwrap();

    assert_eq!(
        repo.latest_timestamp("threads", None).await.unwrap(),
        Some(day(2024, 6, 1))
    );
    let first = repo
        .query_records(&RecordFilter::default(), 1, 0)
        .await
        .unwrap();
    assert_eq!(first[0].id, "2");
}

#[tokio::test]
async fn latest_timestamp_absent_without_rows() {
    let repo = setup_test_db().await;
    assert_eq!(repo.latest_timestamp("threads", None).await.unwrap(), None);

    repo.upsert_records(&[record("web", "1", day(2024, 1, 1), "x")])
        .await
        .unwrap();
    assert_eq!(repo.latest_timestamp("threads", None).await.unwrap(), None);
}

#[tokio::test]
async fn latest_timestamp_scoped_to_author() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 3, 1), "a").with_author("u1", "alice"),
        record("threads", "2", day(2024, 5, 1), "b").with_author("u2", "bob"),
    ])
    .await
    .unwrap();

    assert_eq!(
        repo.latest_timestamp("threads", Some("alice")).await.unwrap(),
        Some(day(2024, 3, 1))
    );
    assert_eq!(
        repo.latest_timestamp("threads", Some("carol")).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn same_id_in_different_sources_are_distinct() {
    let repo = setup_test_db().await;
    let inserted = repo
        .upsert_records(&[
            record("threads", "1", day(2024, 1, 1), "t"),
            record("ddg", "1", day(2024, 1, 1), "d"),
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 2);
}

#[tokio::test]
async fn query_filters_and_paging() {
    let repo = setup_test_db().await;
    repo.upsert_records(&[
        record("threads", "1", day(2024, 1, 1), "a").with_author("u1", "alice"),
        record("threads", "2", day(2024, 2, 1), "b").with_author("u1", "alice"),
        record("threads", "3", day(2024, 3, 1), "c").with_author("u2", "bob"),
        record("web", "4", day(2024, 4, 1), "d"),
    ])
    .await
    .unwrap();

    let by_source = repo
        .query_records(
            &RecordFilter {
                source_id: Some("threads".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    let ids: Vec<&str> = by_source.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "2", "1"]);

    let by_author = repo
        .query_records(
            &RecordFilter {
                author_name: Some("alice".into()),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(by_author.len(), 2);

    let since = repo
        .query_records(
            &RecordFilter {
                since: Some(day(2024, 2, 1)),
                ..Default::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    let ids: Vec<&str> = since.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["4", "3"]);

    let second_page = repo
        .query_records(&RecordFilter::default(), 2, 2)
        .await
        .unwrap();
    let ids: Vec<&str> = second_page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1"]);
}

#[tokio::test]
async fn record_fields_survive_storage() {
    let repo = setup_test_db().await;
    let original = Record::new("42", "threads", "https://www.threads.net/@a/post/X", day(2024, 7, 4))
        .with_author("99", "alice")
        .with_attribute("media_urls", serde_json::json!(["https://cdn/a.jpg"]))
        .with_attribute("is_reply", serde_json::json!(false));

    repo.upsert_records(std::slice::from_ref(&original)).await.unwrap();
    let stored = repo
        .query_records(&RecordFilter::default(), 1, 0)
        .await
        .unwrap();

    assert_eq!(stored[0], original);
    assert!(stored[0].text.is_none());
}

#[tokio::test]
async fn file_database_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("data.db");

    {
        let db = Database::open(&DatabaseConfig::file(&path)).await.unwrap();
        db.content_repo()
            .upsert_records(&[record("threads", "1", day(2024, 1, 1), "kept")])
            .await
            .unwrap();
        db.close().await;
    }

    let db = Database::open(&DatabaseConfig::file(&path)).await.unwrap();
    let stored = db
        .content_repo()
        .query_records(&RecordFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text.as_deref(), Some("kept"));
}

#[tokio::test]
async fn concurrent_writers_keep_one_row_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&DatabaseConfig::file(dir.path().join("data.db")))
        .await
        .unwrap();

    let batch: Vec<Record> = (0..50)
        .map(|i| record("threads", &i.to_string(), day(2024, 1, 1), "same"))
        .collect();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let repo = db.content_repo();
        let batch = batch.clone();
        handles.push(tokio::spawn(async move { repo.upsert_records(&batch).await }));
    }

    let mut inserted = 0;
    for handle in handles {
        inserted += handle.await.unwrap().unwrap();
    }

    assert_eq!(inserted, 50);
    let stats = db.content_repo().stats(None).await.unwrap();
    assert_eq!(stats.total, 50);
}

#[tokio::test]
async fn sub_microsecond_timestamps_round_trip_exactly() {
    let repo = setup_test_db().await;
    let precise = day(2024, 6, 1) + chrono::Duration::nanoseconds(123_456_789);
    repo.upsert_records(&[record("ddg", "r1", precise, "result")])
        .await
        .unwrap();

    let latest = repo.latest_timestamp("ddg", None).await.unwrap();
    assert_eq!(latest, Some(precise));

    let stored = repo
        .query_records(&RecordFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(stored[0].timestamp, precise);

    // The cutoff derived from the store excludes the record itself.
    let newer = RecordFilter {
        since: latest,
        ..RecordFilter::default()
    };
    assert!(repo.query_records(&newer, 10, 0).await.unwrap().is_empty());
}

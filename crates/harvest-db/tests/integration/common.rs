use chrono::{DateTime, NaiveDate, Utc};
use harvest_core::models::Record;
use harvest_db::{ContentRepository, Database, DatabaseConfig};

/// Opens a fresh in-memory database with migrations applied.
pub async fn setup_test_db() -> ContentRepository {
    let db = Database::open(&DatabaseConfig::in_memory())
        .await
        .expect("Failed to open in-memory database");
    db.content_repo()
}

/// Midnight UTC of the given date.
pub fn day(year: i32, month: u32, date: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, date)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time")
        .and_utc()
}

pub fn record(source_id: &str, id: &str, timestamp: DateTime<Utc>, text: &str) -> Record {
    Record::new(id, source_id, format!("https://example.com/{source_id}/{id}"), timestamp)
        .with_text(text)
}

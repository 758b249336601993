use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use harvest_core::error::AppError;
use harvest_core::models::{
    Attributes, CrawlLogEntry, Page, PageFilter, Record, RecordFilter, StoreStats,
};
use harvest_core::traits::ContentStore;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Queries shorter than this many characters skip the trigram index.
const MIN_FTS_QUERY_CHARS: usize = 3;

const RECORD_COLUMNS: &str =
    "r.source_id, r.id, r.url, r.text, r.author_id, r.author_name, r.timestamp, r.attributes";

/// Repository for records, pages and the crawl log in SQLite.
#[derive(Clone)]
pub struct ContentRepository {
    pool: SqlitePool,
}

impl ContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert new records and refresh existing ones, in one transaction.
    ///
    /// Existing rows get their text, url, author and attributes overwritten;
    /// the original `timestamp` is kept. Returns the number of inserted rows.
    pub async fn upsert_records(&self, records: &[Record]) -> Result<u64, AppError> {
        if records.is_empty() {
            return Ok(0);
        }
        let now = format_ts(&Utc::now());
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO records
                    (source_id, id, url, text, author_id, author_name, timestamp, attributes,
                     first_seen_at, last_seen_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, id) DO NOTHING
                "#,
            )
            .bind(&record.source_id)
            .bind(&record.id)
            .bind(&record.url)
            .bind(&record.text)
            .bind(&record.author_id)
            .bind(&record.author_name)
            .bind(format_ts(&record.timestamp))
            .bind(Json(&record.attributes))
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                inserted += 1;
                continue;
            }

            sqlx::query(
                r#"
                UPDATE records
                SET text = ?, url = ?, author_id = ?, author_name = ?, attributes = ?,
                    last_seen_at = ?
                WHERE source_id = ? AND id = ?
                "#,
            )
            .bind(&record.text)
            .bind(&record.url)
            .bind(&record.author_id)
            .bind(&record.author_name)
            .bind(Json(&record.attributes))
            .bind(&now)
            .bind(&record.source_id)
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(total = records.len(), inserted, "Records upserted");
        Ok(inserted)
    }

    /// List records newest first.
    pub async fn query_records(
        &self,
        filter: &RecordFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Record>, AppError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records r WHERE 1=1"));
        if let Some(source_id) = &filter.source_id {
            qb.push(" AND r.source_id = ").push_bind(source_id.as_str());
        }
        if let Some(author_name) = &filter.author_name {
            qb.push(" AND r.author_name = ").push_bind(author_name.as_str());
        }
        if let Some(since) = &filter.since {
            qb.push(" AND r.timestamp > ").push_bind(format_ts(since));
        }
        qb.push(" ORDER BY r.timestamp DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows = qb
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Record::try_from).collect()
    }

    /// Newest timestamp for a source (and optionally one author).
    pub async fn latest_timestamp(
        &self,
        source_id: &str,
        author_name: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(timestamp) FROM records
            WHERE source_id = ? AND (? IS NULL OR author_name = ?)
            "#,
        )
        .bind(source_id)
        .bind(author_name)
        .bind(author_name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        raw.as_deref().map(parse_ts).transpose()
    }

    /// Free-text search over record text, newest first.
    ///
    /// Queries of three or more characters use the trigram index as a
    /// literal phrase; shorter ones fall back to substring matching.
    pub async fn search(
        &self,
        query: &str,
        source_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Record>, AppError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} "));
        if query.chars().count() >= MIN_FTS_QUERY_CHARS {
            qb.push("FROM records r JOIN records_fts ON r.rowid = records_fts.rowid ")
                .push("WHERE records_fts MATCH ")
                .push_bind(fts_phrase(query));
        } else {
            qb.push("FROM records r WHERE r.text LIKE ")
                .push_bind(like_pattern(query))
                .push(" ESCAPE '\\'");
        }
        if let Some(source_id) = source_id {
            qb.push(" AND r.source_id = ").push_bind(source_id);
        }
        qb.push(" ORDER BY r.timestamp DESC LIMIT ")
            .push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Record::try_from).collect()
    }

    /// Append a crawl log entry.
    pub async fn log_crawl(&self, entry: &CrawlLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO crawl_log (source_id, target, items_found, items_new, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.source_id)
        .bind(&entry.target)
        .bind(entry.items_found as i64)
        .bind(entry.items_new as i64)
        .bind(format_ts(&entry.started_at))
        .bind(format_ts(&entry.finished_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent crawl log entries, newest first.
    pub async fn crawl_history(
        &self,
        source_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<CrawlLogEntry>, AppError> {
        let rows = sqlx::query_as::<_, CrawlLogRow>(
            r#"
            SELECT source_id, target, items_found, items_new, started_at, finished_at
            FROM crawl_log
            WHERE (? IS NULL OR source_id = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(CrawlLogEntry::try_from).collect()
    }

    /// Record counts and newest timestamps, overall or for one source.
    pub async fn stats(&self, source_id: Option<&str>) -> Result<StoreStats, AppError> {
        let mut stats = StoreStats::default();

        if let Some(source_id) = source_id {
            let (count, latest): (i64, Option<String>) = sqlx::query_as(
                "SELECT COUNT(*), MAX(timestamp) FROM records WHERE source_id = ?",
            )
            .bind(source_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

            stats.total = count as u64;
            stats.by_source.insert(source_id.to_string(), count as u64);
            stats.latest_by_source.insert(
                source_id.to_string(),
                latest.as_deref().map(parse_ts).transpose()?,
            );
            return Ok(stats);
        }

        let rows: Vec<(String, i64, Option<String>)> = sqlx::query_as(
            "SELECT source_id, COUNT(*), MAX(timestamp) FROM records GROUP BY source_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut by_source = BTreeMap::new();
        let mut latest_by_source = BTreeMap::new();
        for (source, count, latest) in rows {
            stats.total += count as u64;
            latest_by_source.insert(source.clone(), latest.as_deref().map(parse_ts).transpose()?);
            by_source.insert(source, count as u64);
        }
        stats.by_source = by_source;
        stats.latest_by_source = latest_by_source;
        Ok(stats)
    }

    /// Store a page, replacing every field of an existing row with the same URL.
    /// Returns true if the URL was not stored before.
    pub async fn upsert_page(&self, page: &Page) -> Result<bool, AppError> {
        let fetched_at = format_ts(&page.fetched_at);
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            r#"
            INSERT INTO pages (url, source_id, title, body, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&page.url)
        .bind(&page.source_id)
        .bind(&page.title)
        .bind(&page.body)
        .bind(&fetched_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            sqlx::query(
                "UPDATE pages SET source_id = ?, title = ?, body = ?, fetched_at = ? WHERE url = ?",
            )
            .bind(&page.source_id)
            .bind(&page.title)
            .bind(&page.body)
            .bind(&fetched_at)
            .bind(&page.url)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(inserted)
    }

    /// List pages, most recently fetched first.
    pub async fn query_pages(
        &self,
        filter: &PageFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Page>, AppError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT url, source_id, title, body, fetched_at FROM pages WHERE 1=1",
        );
        if let Some(source_id) = &filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.as_str());
        }
        if let Some(url) = &filter.url {
            qb.push(" AND url = ").push_bind(url.as_str());
        }
        qb.push(" ORDER BY fetched_at DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows = qb
            .build_query_as::<PageRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Page::try_from).collect()
    }

    pub async fn get_page(&self, url: &str) -> Result<Option<Page>, AppError> {
        let row = sqlx::query_as::<_, PageRow>(
            "SELECT url, source_id, title, body, fetched_at FROM pages WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Page::try_from).transpose()
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

impl ContentStore for ContentRepository {
    async fn upsert_records(&self, records: &[Record]) -> Result<u64, AppError> {
        ContentRepository::upsert_records(self, records).await
    }

    async fn latest_timestamp(
        &self,
        source_id: &str,
        author_name: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        ContentRepository::latest_timestamp(self, source_id, author_name).await
    }

    async fn log_crawl(&self, entry: &CrawlLogEntry) -> Result<(), AppError> {
        ContentRepository::log_crawl(self, entry).await
    }

    async fn upsert_page(&self, page: &Page) -> Result<bool, AppError> {
        ContentRepository::upsert_page(self, page).await
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Fixed-width RFC 3339 so that text comparison matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::DatabaseError(format!("Invalid stored timestamp '{raw}': {e}")))
}

/// Quote a user query as a single FTS5 string so operators are matched literally.
fn fts_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RecordRow {
    source_id: String,
    id: String,
    url: String,
    text: Option<String>,
    author_id: Option<String>,
    author_name: Option<String>,
    timestamp: String,
    attributes: Json<Attributes>,
}

impl TryFrom<RecordRow> for Record {
    type Error = AppError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(Record {
            id: row.id,
            source_id: row.source_id,
            url: row.url,
            text: row.text,
            author_id: row.author_id,
            author_name: row.author_name,
            timestamp: parse_ts(&row.timestamp)?,
            attributes: row.attributes.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PageRow {
    url: String,
    source_id: String,
    title: Option<String>,
    body: String,
    fetched_at: String,
}

impl TryFrom<PageRow> for Page {
    type Error = AppError;

    fn try_from(row: PageRow) -> Result<Self, Self::Error> {
        Ok(Page {
            url: row.url,
            source_id: row.source_id,
            title: row.title,
            body: row.body,
            fetched_at: parse_ts(&row.fetched_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CrawlLogRow {
    source_id: String,
    target: String,
    items_found: i64,
    items_new: i64,
    started_at: String,
    finished_at: String,
}

impl TryFrom<CrawlLogRow> for CrawlLogEntry {
    type Error = AppError;

    fn try_from(row: CrawlLogRow) -> Result<Self, Self::Error> {
        Ok(CrawlLogEntry {
            source_id: row.source_id,
            target: row.target,
            items_found: row.items_found.max(0) as u64,
            items_new: row.items_new.max(0) as u64,
            started_at: parse_ts(&row.started_at)?,
            finished_at: parse_ts(&row.finished_at)?,
        })
    }
}

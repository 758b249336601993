use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema-free extension bag carried by every [`Record`].
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// One unit of scraped content.
///
/// `(source_id, id)` is the natural key: two records sharing it are the same
/// logical entity observed at different times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Adapter-defined identifier, unique within `source_id`.
    pub id: String,
    /// Site/adapter that produced the record.
    pub source_id: String,
    pub url: String,
    /// Primary free text, indexed for search.
    pub text: Option<String>,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    /// Event time used for ordering and incremental cutoffs.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            url: url.into(),
            text: None,
            author_id: None,
            author_name: None,
            timestamp,
            attributes: Attributes::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_author(mut self, author_id: impl Into<String>, author_name: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self.author_name = Some(author_name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// A full-document capture, keyed by URL and replaced wholesale on re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub source_id: String,
    pub title: Option<String>,
    /// Rendered document content (Markdown).
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Append-only audit entry for one target traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlLogEntry {
    pub source_id: String,
    pub target: String,
    pub items_found: u64,
    pub items_new: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Summary of a crawl run, derived from engine output and store upsert counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSummary {
    pub source_id: String,
    pub items_found: u64,
    pub items_new: u64,
    pub duration: Duration,
    /// Targets abandoned because of a navigation/browser failure.
    pub targets_failed: usize,
    /// The run was cancelled before visiting every target.
    pub interrupted: bool,
}

/// Filters for record listing. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source_id: Option<String>,
    pub author_name: Option<String>,
    /// Only records strictly newer than this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Filters for page listing. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub source_id: Option<String>,
    pub url: Option<String>,
}

/// Aggregate counts over stored records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_source: BTreeMap<String, u64>,
    pub latest_by_source: BTreeMap<String, Option<DateTime<Utc>>>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

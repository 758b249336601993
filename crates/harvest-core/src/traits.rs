use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::AuthState;
use crate::error::AppError;
use crate::models::{CrawlLogEntry, Page, Record};

/// Callback invoked by a session for every completed network response whose
/// body parsed as JSON. Receives the response URL and the parsed body.
pub type ResponseHook = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;

/// Decides whether an intercepted response is relevant to an adapter.
pub type CapturePredicate = Arc<dyn Fn(&str, &serde_json::Value) -> bool + Send + Sync>;

/// Converts one captured payload into zero or more records.
pub type ParseFn = Arc<dyn Fn(&serde_json::Value) -> Vec<Record> + Send + Sync>;

/// Rendered state of a page: its title and serialized DOM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    pub title: Option<String>,
    pub html: String,
}

/// Opens browser sessions, optionally bound to a saved authentication state.
pub trait SessionDriver: Send + Sync {
    type Session: BrowserSession;

    fn open_session(
        &self,
        auth_state: Option<&AuthState>,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// One isolated browsing session (a single page in its own context).
///
/// `close` consumes the session, so it can be released at most once.
pub trait BrowserSession: Send {
    /// Register a hook for intercepted responses. Hooks must not panic the
    /// session; a failing body parse is dropped before the hook runs.
    fn on_response(&mut self, hook: ResponseHook);

    /// Navigate and wait for the load signal. Callers apply their own timeout.
    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scroll to the bottom of the document once.
    fn scroll_once(&mut self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Capture the current title and HTML.
    fn snapshot(&mut self) -> impl Future<Output = Result<PageSnapshot, AppError>> + Send;

    /// Release the session and everything it owns.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Receives parsed records while a crawl is still running.
pub trait CrawlSink: Send {
    /// Called with exactly the newly parsed records of one parse step.
    /// Never called with an empty batch. An error aborts the crawl.
    fn on_batch(&mut self, records: &[Record])
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Called after every scroll with the scroll index and the running total.
    fn on_progress(&mut self, scroll: u32, total_seen: usize) {
        let _ = (scroll, total_seen);
    }
}

/// Durable record/page storage used by the crawl services.
pub trait ContentStore: Send + Sync + Clone {
    /// Insert or update records by `(source_id, id)`. Returns the number of inserts.
    fn upsert_records(
        &self,
        records: &[Record],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Newest stored timestamp for a source, optionally scoped to one author.
    fn latest_timestamp(
        &self,
        source_id: &str,
        author_name: Option<&str>,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;

    /// Append one crawl log entry.
    fn log_crawl(&self, entry: &CrawlLogEntry)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Replace a page by URL. Returns true when the URL was not stored before.
    fn upsert_page(&self, page: &Page) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Fetches raw content from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

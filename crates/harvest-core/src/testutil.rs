//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! Shared mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::crawl::{CrawlEvent, CrawlReporter};
use crate::error::AppError;
use crate::models::{CrawlLogEntry, Page, Record};
use crate::traits::{
    BrowserSession, CapturePredicate, Cleaner, ContentStore, CrawlSink, PageSnapshot, ParseFn,
    ResponseHook, SessionDriver,
};
use crate::util::parse_since;

/// URL reported for every payload a mock session emits.
pub const MOCK_API_URL: &str = "https://mock.test/api/graphql";

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Midnight UTC of a `YYYY-MM-DD` date.
pub fn ts(date: &str) -> DateTime<Utc> {
    parse_since(date).unwrap()
}

/// `{"items": [{"id": .., "date": ..}, ..]}`
pub fn items_payload(items: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|(id, date)| json!({"id": id, "date": date}))
        .collect();
    json!({ "items": items })
}

/// Parser for [`items_payload`] bodies.
pub fn ts_parser() -> ParseFn {
    Arc::new(|body: &Value| {
        body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = item["id"].as_str()?;
                        let timestamp = parse_since(item["date"].as_str()?).ok()?;
                        Some(
                            Record::new(id, "mock", format!("https://mock.test/{id}"), timestamp)
                                .with_text(format!("item {id}")),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    })
}

pub fn accept_all() -> CapturePredicate {
    Arc::new(|_: &str, _: &Value| true)
}

// ---------------------------------------------------------------------------
// MockDriver / MockSession
// ---------------------------------------------------------------------------

/// Calls observed across every session of a [`MockDriver`].
#[derive(Debug, Default, Clone)]
pub struct DriverLog {
    pub sessions_opened: u32,
    pub sessions_closed: u32,
    pub authenticated_sessions: u32,
    pub scrolls: u32,
    pub navigations: Vec<String>,
}

/// Driver whose sessions replay scripted payload pages.
///
/// `pages[0]` is emitted on navigation and `pages[n]` on the n-th scroll.
/// Every session replays from the start.
#[derive(Clone)]
pub struct MockDriver {
    pages: Arc<Vec<Vec<Value>>>,
    hang_navigation: bool,
    failing_navigation: Option<String>,
    failing_targets: Arc<HashMap<String, String>>,
    /// Pages whose payloads arrive this long after the triggering call.
    delays: Arc<HashMap<usize, Duration>>,
    snapshot: PageSnapshot,
    log: Arc<Mutex<DriverLog>>,
}

impl MockDriver {
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages: Arc::new(pages),
            hang_navigation: false,
            failing_navigation: None,
            failing_targets: Arc::new(HashMap::new()),
            delays: Arc::new(HashMap::new()),
            snapshot: PageSnapshot::default(),
            log: Arc::new(Mutex::new(DriverLog::default())),
        }
    }

    /// Navigation never completes.
    pub fn hanging_navigation(mut self) -> Self {
        self.hang_navigation = true;
        self
    }

    /// Every navigation fails with `message`.
    pub fn failing_navigation(mut self, message: &str) -> Self {
        self.failing_navigation = Some(message.to_string());
        self
    }

    /// Navigation to `target` fails with `message`.
    pub fn fail_navigation_to(mut self, target: &str, message: &str) -> Self {
        let mut targets = (*self.failing_targets).clone();
        targets.insert(target.to_string(), message.to_string());
        self.failing_targets = Arc::new(targets);
        self
    }

    /// Deliver `pages[page]` from a background task `delay` after the
    /// navigation or scroll that triggers it.
    pub fn delay_page(mut self, page: usize, delay: Duration) -> Self {
        let mut delays = (*self.delays).clone();
        delays.insert(page, delay);
        self.delays = Arc::new(delays);
        self
    }

    pub fn with_snapshot(mut self, title: Option<&str>, html: &str) -> Self {
        self.snapshot = PageSnapshot {
            title: title.map(str::to_string),
            html: html.to_string(),
        };
        self
    }

    pub fn log(&self) -> DriverLog {
        self.log.lock().unwrap().clone()
    }
}

impl SessionDriver for MockDriver {
    type Session = MockSession;

    async fn open_session(&self, auth_state: Option<&AuthState>) -> Result<MockSession, AppError> {
        {
            let mut log = self.log.lock().unwrap();
            log.sessions_opened += 1;
            if auth_state.is_some() {
                log.authenticated_sessions += 1;
            }
        }
        Ok(MockSession {
            driver: self.clone(),
            hooks: Vec::new(),
            scrolled: 0,
        })
    }
}

pub struct MockSession {
    driver: MockDriver,
    hooks: Vec<ResponseHook>,
    scrolled: usize,
}

impl MockSession {
    fn emit(&self, page: usize) {
        let Some(payloads) = self.driver.pages.get(page).cloned() else {
            return;
        };
        let hooks = self.hooks.clone();
        let deliver = move || {
            for payload in &payloads {
                for hook in &hooks {
                    hook(MOCK_API_URL, payload);
                }
            }
        };
        match self.driver.delays.get(&page).copied() {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    deliver();
                });
            }
            None => deliver(),
        }
    }
}

impl BrowserSession for MockSession {
    fn on_response(&mut self, hook: ResponseHook) {
        self.hooks.push(hook);
    }

    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        self.driver
            .log
            .lock()
            .unwrap()
            .navigations
            .push(url.to_string());

        if self.driver.hang_navigation {
            std::future::pending::<()>().await;
        }
        let failure = self
            .driver
            .failing_targets
            .get(url)
            .or(self.driver.failing_navigation.as_ref());
        if let Some(message) = failure {
            return Err(AppError::NavigationError {
                target: url.to_string(),
                message: message.clone(),
            });
        }
        self.emit(0);
        Ok(())
    }

    async fn scroll_once(&mut self) -> Result<(), AppError> {
        self.driver.log.lock().unwrap().scrolls += 1;
        self.scrolled += 1;
        self.emit(self.scrolled);
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, AppError> {
        Ok(self.driver.snapshot.clone())
    }

    async fn close(self) {
        self.driver.log.lock().unwrap().sessions_closed += 1;
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Sink that keeps every batch and progress call.
#[derive(Default)]
pub struct RecordingSink {
    batches: Vec<Vec<Record>>,
    progress: Vec<(u32, usize)>,
    fail_after: Option<usize>,
    cancel_on: Option<(u32, CancellationToken)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` batches, then fail every later one.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Cancel `token` when progress for scroll `scroll` arrives.
    pub fn cancel_on_progress(mut self, scroll: u32, token: CancellationToken) -> Self {
        self.cancel_on = Some((scroll, token));
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.iter().map(Vec::len).collect()
    }

    pub fn records(&self) -> Vec<Record> {
        self.batches.iter().flatten().cloned().collect()
    }

    pub fn progress(&self) -> Vec<(u32, usize)> {
        self.progress.clone()
    }
}

impl CrawlSink for RecordingSink {
    async fn on_batch(&mut self, records: &[Record]) -> Result<(), AppError> {
        if self.fail_after.is_some_and(|n| self.batches.len() >= n) {
            return Err(AppError::DatabaseError("sink rejected batch".into()));
        }
        self.batches.push(records.to_vec());
        Ok(())
    }

    fn on_progress(&mut self, scroll: u32, total_seen: usize) {
        self.progress.push((scroll, total_seen));
        if let Some((at, token)) = &self.cancel_on {
            if *at == scroll {
                token.cancel();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    records: HashMap<(String, String), Record>,
    pages: HashMap<String, Page>,
    crawl_log: Vec<CrawlLogEntry>,
}

/// In-memory [`ContentStore`] with the same upsert semantics as the database.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
    fail_upserts: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_upserts(mut self) -> Self {
        self.fail_upserts = true;
        self
    }

    pub fn seed(&self, records: Vec<Record>) {
        let mut state = self.state.lock().unwrap();
        for record in records {
            state
                .records
                .insert((record.source_id.clone(), record.id.clone()), record);
        }
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn page(&self, url: &str) -> Option<Page> {
        self.state.lock().unwrap().pages.get(url).cloned()
    }

    pub fn crawl_log(&self) -> Vec<CrawlLogEntry> {
        self.state.lock().unwrap().crawl_log.clone()
    }
}

impl ContentStore for MockStore {
    async fn upsert_records(&self, records: &[Record]) -> Result<u64, AppError> {
        if self.fail_upserts {
            return Err(AppError::DatabaseError("disk I/O error".into()));
        }
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for record in records {
            let key = (record.source_id.clone(), record.id.clone());
            match state.records.get_mut(&key) {
                Some(existing) => {
                    existing.text = record.text.clone();
                    existing.url = record.url.clone();
                    existing.author_id = record.author_id.clone();
                    existing.author_name = record.author_name.clone();
                    existing.attributes = record.attributes.clone();
                }
                None => {
                    state.records.insert(key, record.clone());
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    async fn latest_timestamp(
        &self,
        source_id: &str,
        author_name: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .values()
            .filter(|r| r.source_id == source_id)
            .filter(|r| author_name.is_none() || r.author_name.as_deref() == author_name)
            .map(|r| r.timestamp)
            .max())
    }

    async fn log_crawl(&self, entry: &CrawlLogEntry) -> Result<(), AppError> {
        self.state.lock().unwrap().crawl_log.push(entry.clone());
        Ok(())
    }

    async fn upsert_page(&self, page: &Page) -> Result<bool, AppError> {
        let previous = self
            .state
            .lock()
            .unwrap()
            .pages
            .insert(page.url.clone(), page.clone());
        Ok(previous.is_none())
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Cleaner that returns its input, or a configured error once.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that stores a short label per event.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl CrawlReporter for RecordingReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let label = match event {
            CrawlEvent::TargetStarted { target, .. } => format!("started {target}"),
            CrawlEvent::Progress { scroll, .. } => format!("scroll {scroll}"),
            CrawlEvent::BatchStored { found, new, .. } => format!("batch {found}/{new}"),
            CrawlEvent::TargetFinished { target, .. } => format!("finished {target}"),
            CrawlEvent::TargetFailed { target, .. } => format!("failed {target}"),
            CrawlEvent::Interrupted { found, new } => format!("interrupted {found}/{new}"),
        };
        self.events.lock().unwrap().push(label);
    }
}

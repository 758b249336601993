pub mod auth;
pub mod capture;
pub mod config;
pub mod crawl;
pub mod engine;
pub mod error;
pub mod models;
pub mod pacing;
pub mod page_capture;
pub mod traits;
pub mod util;

#[cfg(test)]
pub mod testutil;

pub use auth::AuthState;
pub use config::{EngineConfig, HarvestPaths};
pub use crawl::{CrawlEvent, CrawlJob, CrawlReporter, CrawlService, TracingCrawlReporter};
pub use engine::{CrawlEngine, CrawlRequest, EngineRun, StopReason};
pub use error::AppError;
pub use models::{
    CrawlLogEntry, CrawlSummary, Page, PageFilter, Record, RecordFilter, StoreStats, compute_hash,
};
pub use page_capture::PageCapture;
pub use traits::{
    BrowserSession, CapturePredicate, Cleaner, ContentStore, CrawlSink, Fetcher, ParseFn,
    SessionDriver,
};

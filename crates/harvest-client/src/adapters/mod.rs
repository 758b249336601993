//! Site adapters and their registry.
//!
//! An adapter knows three things about a site: which URLs to visit for a
//! set of user parameters, which intercepted responses matter, and how to
//! turn those responses into records. How a site is crawled is fixed by its
//! [`CrawlMode`].

pub mod ddg;
pub mod threads;
pub mod web;

use std::fmt;
use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::models::Record;
use harvest_core::traits::{CapturePredicate, Fetcher, ParseFn};
use harvest_core::util::AdapterParams;

/// How an adapter's targets are crawled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Scroll a rendered page and parse intercepted JSON responses into records.
    Intercept,
    /// Render each target once and store the whole document as a page.
    Page,
    /// Fetch over plain HTTP; no browser involved.
    Http,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlMode::Intercept => "intercept",
            CrawlMode::Page => "page",
            CrawlMode::Http => "http",
        };
        f.write_str(name)
    }
}

/// Static description of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterInfo {
    pub site_id: &'static str,
    pub display_name: &'static str,
    /// Where `harvest login` sends the user, for sites that need a session.
    pub login_url: Option<&'static str>,
    pub requires_login: bool,
    pub description: &'static str,
    pub mode: CrawlMode,
}

/// One adapter-specific `harvest crawl` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOption {
    pub name: &'static str,
    pub help: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Threads,
    Web,
    DuckDuckGo,
}

impl Adapter {
    pub const ALL: [Adapter; 3] = [Adapter::Threads, Adapter::Web, Adapter::DuckDuckGo];

    pub fn info(&self) -> AdapterInfo {
        match self {
            Adapter::Threads => threads::INFO,
            Adapter::Web => web::INFO,
            Adapter::DuckDuckGo => ddg::INFO,
        }
    }

    pub fn site_id(&self) -> &'static str {
        self.info().site_id
    }

    pub fn options(&self) -> &'static [AdapterOption] {
        match self {
            Adapter::Threads => threads::OPTIONS,
            Adapter::Web => web::OPTIONS,
            Adapter::DuckDuckGo => ddg::OPTIONS,
        }
    }

    /// Response filter for intercept-mode crawls. Other modes accept nothing.
    pub fn capture_predicate(&self) -> CapturePredicate {
        match self {
            Adapter::Threads => threads::capture_predicate(),
            Adapter::Web | Adapter::DuckDuckGo => Arc::new(|_: &str, _: &serde_json::Value| false),
        }
    }

    pub fn parser(&self) -> ParseFn {
        match self {
            Adapter::Threads => threads::parser(),
            Adapter::Web | Adapter::DuckDuckGo => Arc::new(|_: &serde_json::Value| Vec::new()),
        }
    }

    /// Resolve user parameters into the URLs to visit.
    pub fn targets(&self, params: &AdapterParams) -> Result<Vec<String>, AppError> {
        match self {
            Adapter::Threads => threads::targets(params),
            Adapter::Web => web::targets(params),
            Adapter::DuckDuckGo => ddg::targets(params),
        }
    }

    /// Author scope for the incremental cutoff: a single-user crawl only
    /// needs to catch up with that user's newest stored record.
    pub fn author_scope(&self, params: &AdapterParams) -> Option<String> {
        match self {
            Adapter::Threads if !params.contains_key("url") => params
                .get("user")
                .map(|user| user.trim_start_matches('@').to_string()),
            _ => None,
        }
    }

    /// Fetch records directly for [`CrawlMode::Http`] adapters.
    pub async fn fetch_records<F: Fetcher>(
        &self,
        fetcher: &F,
        params: &AdapterParams,
    ) -> Result<Vec<Record>, AppError> {
        match self {
            Adapter::DuckDuckGo => ddg::fetch_records(fetcher, params).await,
            other => Err(AppError::ConfigError(format!(
                "Adapter '{}' does not support direct HTTP fetching",
                other.site_id()
            ))),
        }
    }
}

/// Look up an adapter by site id.
pub fn get_adapter(site_id: &str) -> Result<Adapter, AppError> {
    Adapter::ALL
        .into_iter()
        .find(|adapter| adapter.site_id() == site_id)
        .ok_or_else(|| AppError::UnknownAdapter {
            site_id: site_id.to_string(),
            available: list_adapters()
                .iter()
                .map(Adapter::site_id)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// All registered adapters, sorted by site id.
pub fn list_adapters() -> Vec<Adapter> {
    let mut adapters = Adapter::ALL.to_vec();
    adapters.sort_by_key(|adapter| adapter.site_id());
    adapters
}

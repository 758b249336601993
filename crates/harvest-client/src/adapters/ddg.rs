use chrono::{DateTime, Utc};
use harvest_core::compute_hash;
use harvest_core::error::AppError;
use harvest_core::models::Record;
use harvest_core::traits::Fetcher;
use harvest_core::util::AdapterParams;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use url::Url;

use super::{AdapterInfo, AdapterOption, CrawlMode};

pub const SITE_ID: &str = "ddg";
const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

pub const INFO: AdapterInfo = AdapterInfo {
    site_id: SITE_ID,
    display_name: "DuckDuckGo Search",
    login_url: None,
    requires_login: false,
    description: "Search DuckDuckGo and store results (no browser needed)",
    mode: CrawlMode::Http,
};

pub const OPTIONS: &[AdapterOption] = &[AdapterOption {
    name: "--query",
    help: "Search query",
    required: true,
    default: None,
}];

pub fn targets(params: &AdapterParams) -> Result<Vec<String>, AppError> {
    Ok(vec![search_url(query(params)?)?])
}

fn query(params: &AdapterParams) -> Result<&str, AppError> {
    params
        .get("query")
        .map(String::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::ConfigError("ddg adapter requires --query".to_string()))
}

pub fn search_url(query: &str) -> Result<String, AppError> {
    let url = Url::parse_with_params(SEARCH_ENDPOINT, &[("q", query)])
        .map_err(|e| AppError::ConfigError(format!("Invalid search URL: {e}")))?;
    Ok(url.into())
}

/// Run the search for `--query` and parse the result page.
pub async fn fetch_records<F: Fetcher>(
    fetcher: &F,
    params: &AdapterParams,
) -> Result<Vec<Record>, AppError> {
    let query = query(params)?;
    let html = fetcher.fetch(&search_url(query)?).await?;
    let records = parse_html(&html, query, Utc::now())?;
    tracing::debug!(query, results = records.len(), "Search results parsed");
    Ok(records)
}

/// Stable record id for a result: the same URL found by the same query
/// always maps to the same record.
pub fn result_id(url: &str, query: &str) -> String {
    let mut hash = compute_hash(&format!("{url}|{query}"));
    hash.truncate(16);
    hash
}

/// Parse a result page. Every record is stamped with `fetched_at`.
pub fn parse_html(
    html: &str,
    query: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Record>, AppError> {
    let document = Html::parse_document(html);
    let result_sel = selector(".result:not(.result--sep)")?;
    let title_sel = selector(".result__title a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut records = Vec::new();
    for (index, result) in document.select(&result_sel).enumerate() {
        let Some(anchor) = result.select(&title_sel).next() else {
            continue;
        };
        let url = anchor
            .value()
            .attr("href")
            .map(resolve_result_link)
            .unwrap_or_default();
        let title = element_text(anchor);
        if url.is_empty() || title.is_empty() {
            continue;
        }
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty());

        records.push(
            Record::new(result_id(&url, query), SITE_ID, url, fetched_at)
                .with_text(title)
                .with_attribute("query", json!(query))
                .with_attribute("rank", json!(index + 1))
                .with_attribute("snippet", json!(snippet)),
        );
    }
    Ok(records)
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::Generic(format!("Invalid selector '{css}': {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result links may point at the `/l/?uddg=<target>` redirector; unwrap them
/// to the destination URL.
fn resolve_result_link(href: &str) -> String {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let Ok(parsed) = Url::parse(&absolute) else {
        return href.to_string();
    };
    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path() == "/l/";
    if is_redirect {
        if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
            return target.into_owned();
        }
    }
    absolute
}

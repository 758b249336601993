use std::path::Path;

use harvest_core::error::AppError;
use harvest_core::util::AdapterParams;

use super::{AdapterInfo, AdapterOption, CrawlMode};

pub const SITE_ID: &str = "web";

pub const INFO: AdapterInfo = AdapterInfo {
    site_id: SITE_ID,
    display_name: "Generic Web Page",
    login_url: None,
    requires_login: false,
    description: "Crawl any public webpage and convert HTML to Markdown",
    mode: CrawlMode::Page,
};

pub const OPTIONS: &[AdapterOption] = &[
    AdapterOption {
        name: "--url",
        help: "URL to crawl",
        required: false,
        default: None,
    },
    AdapterOption {
        name: "--url-list",
        help: "Text file with URLs, one per line (# for comments)",
        required: false,
        default: None,
    },
];

pub fn targets(params: &AdapterParams) -> Result<Vec<String>, AppError> {
    if let Some(url) = params.get("url") {
        return Ok(vec![url.clone()]);
    }
    match params.get("url_list") {
        Some(path) => read_url_list(Path::new(path)),
        None => Err(AppError::ConfigError(
            "web adapter requires --url or --url-list".to_string(),
        )),
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
fn read_url_list(path: &Path) -> Result<Vec<String>, AppError> {
    if !path.exists() {
        return Err(AppError::ConfigError(format!(
            "URL list file not found: {}",
            path.display()
        )));
    }
    let urls: Vec<String> = std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        return Err(AppError::ConfigError(format!(
            "No URLs found in {}",
            path.display()
        )));
    }
    Ok(urls)
}

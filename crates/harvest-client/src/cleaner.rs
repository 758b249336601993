use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::traits::Cleaner;
use htmd::HtmlToMarkdown;

/// HTML-to-Markdown cleaner for captured pages.
///
/// Page chrome (navigation, headers, footers) and non-content elements are
/// dropped so the stored body is the readable document only.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe",
                "svg", "form", "button",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))?;
        Ok(markdown.trim().to_string())
    }
}

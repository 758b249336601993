pub mod adapters;
pub mod browser;
pub mod cleaner;
pub mod fetcher;

pub use adapters::{Adapter, AdapterInfo, AdapterOption, CrawlMode, get_adapter, list_adapters};
pub use browser::{BrowserOptions, ChromiumDriver, ChromiumSession};
pub use cleaner::HtmdCleaner;
pub use fetcher::ReqwestFetcher;

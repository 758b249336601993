mod common;
mod page_tests;
mod record_tests;
mod search_tests;
mod stats_tests;

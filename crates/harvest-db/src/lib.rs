pub mod config;
pub mod content_repository;
pub mod database;

pub use config::{DatabaseConfig, DatabaseLocation};
pub use content_repository::ContentRepository;
pub use database::Database;

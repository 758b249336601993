use std::path::{Path, PathBuf};

use harvest_core::AppError;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Private in-memory database, gone when the pool closes.
    InMemory,
}

/// Configuration for the database connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            max_connections: 5,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::InMemory,
            max_connections: 1,
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `HARVEST_DB_PATH` (optional, defaults to `default_path`; `:memory:` for in-memory)
    /// - `HARVEST_DB_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env(default_path: &Path) -> Result<Self, AppError> {
        Self::from_lookup(default_path, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        default_path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let location = match lookup("HARVEST_DB_PATH") {
            Some(raw) if raw.trim() == ":memory:" => DatabaseLocation::InMemory,
            Some(raw) if !raw.trim().is_empty() => DatabaseLocation::File(PathBuf::from(raw.trim())),
            _ => DatabaseLocation::File(default_path.to_path_buf()),
        };

        let max_connections = match lookup("HARVEST_DB_MAX_CONNECTIONS") {
            None => 5,
            Some(raw) => {
                let parsed: u32 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid HARVEST_DB_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "HARVEST_DB_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        Ok(Self {
            location,
            max_connections,
        })
    }
}

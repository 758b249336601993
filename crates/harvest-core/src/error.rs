use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration (adapter parameters, env vars, target lists).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No adapter is registered under the requested site id.
    #[error("Unknown site '{site_id}'. Available: {available}")]
    UnknownAdapter { site_id: String, available: String },

    /// The browser could not navigate to a target.
    #[error("Navigation to {target} failed: {message}")]
    NavigationError { target: String, message: String },

    /// The target did not finish loading within the navigation timeout.
    #[error("Navigation to {target} timed out after {secs} seconds")]
    NavigationTimeout { target: String, secs: u64 },

    /// Browser driver failure (launch, context, CDP command).
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem error (auth state, URL lists, exports).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error only invalidates the current target.
    ///
    /// The crawl service logs these and moves on to the next target; any
    /// other error aborts the whole run.
    pub fn is_target_failure(&self) -> bool {
        matches!(
            self,
            AppError::NavigationError { .. }
                | AppError::NavigationTimeout { .. }
                | AppError::BrowserError(_)
                | AppError::Timeout(_)
        )
    }
}

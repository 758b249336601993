use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::AppError;

/// Free-form `--key value` parameters forwarded to an adapter.
pub type AdapterParams = BTreeMap<String, String>;

/// Parse a user-supplied cutoff date.
///
/// Accepts `YYYY-MM-DD` (midnight UTC), a naive `YYYY-MM-DDTHH:MM:SS`
/// (read as UTC), or a full RFC 3339 timestamp.
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    Err(AppError::ConfigError(format!(
        "Invalid date format: '{raw}'. Use YYYY-MM-DD or RFC 3339."
    )))
}

/// Collect trailing `--key value` pairs into adapter parameters.
///
/// Dashes in keys become underscores. A key followed by another key, or by
/// nothing, is a flag and maps to `"true"`. Stray positional values are ignored.
pub fn parse_adapter_params(args: &[String]) -> AdapterParams {
    let mut params = AdapterParams::new();
    let mut iter = args.iter().peekable();
    while let Some(token) = iter.next() {
        let Some(key) = token.strip_prefix("--") else {
            continue;
        };
        let key = key.trim_start_matches('-').replace('-', "_");
        let value = match iter.peek() {
            Some(next) if !next.starts_with("--") => iter.next().cloned().unwrap_or_default(),
            _ => "true".to_string(),
        };
        params.insert(key, value);
    }
    params
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;
use crate::pacing::{DelayRange, PollBudget};

/// Tuning knobs for [`CrawlEngine`](crate::engine::CrawlEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on scroll iterations per target.
    pub max_scrolls: u32,
    /// Base pause after each scroll.
    pub scroll_delay: DelayRange,
    /// Independent jitter added to `scroll_delay`.
    pub request_jitter: DelayRange,
    /// Hard limit on the initial navigation.
    pub nav_timeout: Duration,
    /// Waiting for the first payload after navigation.
    pub initial_poll: PollBudget,
    /// Randomized pause before the first parse.
    pub settle_delay: DelayRange,
    /// Fixed pause between a scroll and its poll loop.
    pub post_scroll_wait: Duration,
    /// Waiting for new payloads after each scroll.
    pub scroll_poll: PollBudget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scrolls: 50,
            scroll_delay: DelayRange::new(Duration::from_secs(3), Duration::from_secs(8)),
            request_jitter: DelayRange::up_to(Duration::from_secs(2)),
            nav_timeout: Duration::from_secs(60),
            initial_poll: PollBudget::new(30, Duration::from_secs(1)),
            settle_delay: DelayRange::new(Duration::from_secs(2), Duration::from_secs(4)),
            post_scroll_wait: Duration::from_millis(500),
            scroll_poll: PollBudget::new(10, Duration::from_millis(500)),
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `HARVEST_MAX_PAGES` (scroll cap, defaults to 50)
    /// - `HARVEST_SCROLL_DELAY_MIN` / `HARVEST_SCROLL_DELAY_MAX` (seconds, 3.0 / 8.0)
    /// - `HARVEST_REQUEST_JITTER` (seconds, 2.0)
    /// - `HARVEST_NAV_TIMEOUT` (seconds, 60)
    /// - `HARVEST_POLL_ATTEMPTS` / `HARVEST_POLL_INTERVAL` (first payload wait, 30 × 1.0 s)
    /// - `HARVEST_SCROLL_POLL_ATTEMPTS` / `HARVEST_SCROLL_POLL_INTERVAL` (per scroll, 10 × 0.5 s)
    /// - `HARVEST_SETTLE_DELAY_MIN` / `HARVEST_SETTLE_DELAY_MAX` (seconds, 2.0 / 4.0)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let max_scrolls = count(&lookup, "HARVEST_MAX_PAGES", defaults.max_scrolls)?;
        let scroll_delay = delay_range(
            &lookup,
            "HARVEST_SCROLL_DELAY_MIN",
            "HARVEST_SCROLL_DELAY_MAX",
            defaults.scroll_delay,
        )?;
        let settle_delay = delay_range(
            &lookup,
            "HARVEST_SETTLE_DELAY_MIN",
            "HARVEST_SETTLE_DELAY_MAX",
            defaults.settle_delay,
        )?;
        let initial_poll = PollBudget::new(
            count(&lookup, "HARVEST_POLL_ATTEMPTS", defaults.initial_poll.attempts)?,
            seconds(&lookup, "HARVEST_POLL_INTERVAL", defaults.initial_poll.interval)?,
        );
        let scroll_poll = PollBudget::new(
            count(&lookup, "HARVEST_SCROLL_POLL_ATTEMPTS", defaults.scroll_poll.attempts)?,
            seconds(&lookup, "HARVEST_SCROLL_POLL_INTERVAL", defaults.scroll_poll.interval)?,
        );
        let jitter = seconds(&lookup, "HARVEST_REQUEST_JITTER", defaults.request_jitter.max)?;

        let nav_timeout = seconds(&lookup, "HARVEST_NAV_TIMEOUT", defaults.nav_timeout)?;
        if nav_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "HARVEST_NAV_TIMEOUT must be greater than zero".into(),
            ));
        }

        Ok(Self {
            max_scrolls,
            scroll_delay,
            request_jitter: DelayRange::up_to(jitter),
            nav_timeout,
            initial_poll,
            settle_delay,
            scroll_poll,
            ..defaults
        })
    }

    /// No pauses at all; tiny poll budgets.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            max_scrolls: 50,
            scroll_delay: DelayRange::zero(),
            request_jitter: DelayRange::zero(),
            nav_timeout: Duration::from_secs(5),
            initial_poll: PollBudget::new(1, Duration::ZERO),
            settle_delay: DelayRange::zero(),
            post_scroll_wait: Duration::ZERO,
            scroll_poll: PollBudget::new(1, Duration::ZERO),
        }
    }

    pub fn with_max_scrolls(mut self, max_scrolls: u32) -> Self {
        self.max_scrolls = max_scrolls;
        self
    }
}

fn count(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u32,
) -> Result<u32, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
    })
}

fn delay_range(
    lookup: &impl Fn(&str) -> Option<String>,
    min_key: &str,
    max_key: &str,
    default: DelayRange,
) -> Result<DelayRange, AppError> {
    let min = seconds(lookup, min_key, default.min)?;
    let max = seconds(lookup, max_key, default.max)?;
    if max < min {
        return Err(AppError::ConfigError(format!(
            "{max_key} must not be smaller than {min_key}"
        )));
    }
    Ok(DelayRange::new(min, max))
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value: f64 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a number of seconds"))
    })?;
    Duration::try_from_secs_f64(value).map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative number"))
    })
}

/// Filesystem locations: base directory, auth states, default database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestPaths {
    base_dir: PathBuf,
}

impl HarvestPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `HARVEST_HOME`, or `~/.harvest`.
    pub fn from_env() -> Result<Self, AppError> {
        if let Ok(home) = std::env::var("HARVEST_HOME") {
            return Ok(Self::new(home));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            AppError::ConfigError("Cannot determine home directory; set HARVEST_HOME".into())
        })?;
        Ok(Self::new(home.join(".harvest")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn states_dir(&self) -> PathBuf {
        self.base_dir.join("states")
    }

    pub fn state_path_for(&self, site_id: &str) -> PathBuf {
        self.states_dir().join(format!("{site_id}.json"))
    }

    pub fn default_db_path(&self) -> PathBuf {
        self.base_dir.join("data.db")
    }

    pub fn ensure_dirs(&self) -> Result<(), AppError> {
        std::fs::create_dir_all(self.states_dir())?;
        Ok(())
    }
}

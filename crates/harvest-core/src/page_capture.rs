use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::crawl::{CrawlEvent, CrawlReporter};
use crate::error::AppError;
use crate::models::{CrawlLogEntry, CrawlSummary, Page};
use crate::traits::{BrowserSession, Cleaner, ContentStore, PageSnapshot, SessionDriver};

/// Renders page-mode targets and stores each one whole as a Markdown [`Page`].
pub struct PageCapture<D, C> {
    driver: D,
    cleaner: C,
    nav_timeout: Duration,
    cancel_token: CancellationToken,
}

impl<D, C> PageCapture<D, C>
where
    D: SessionDriver,
    C: Cleaner,
{
    pub fn new(driver: D, cleaner: C, nav_timeout: Duration) -> Self {
        Self {
            driver,
            cleaner,
            nav_timeout,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Render `url` and convert it into a [`Page`]. The session is always closed.
    ///
    /// Returns `Ok(None)` when the cancellation token fires before the page loads.
    pub async fn capture(
        &self,
        source_id: &str,
        url: &str,
        auth_state: Option<&AuthState>,
    ) -> Result<Option<Page>, AppError> {
        let mut session = self.driver.open_session(auth_state).await?;
        let snapshot = self.render(&mut session, url).await;
        session.close().await;
        let Some(snapshot) = snapshot? else {
            return Ok(None);
        };

        let body = self.cleaner.clean(&snapshot.html)?;
        tracing::debug!(
            %url,
            html_bytes = snapshot.html.len(),
            markdown_bytes = body.len(),
            "Page cleaned"
        );

        Ok(Some(Page {
            url: url.to_string(),
            source_id: source_id.to_string(),
            title: snapshot.title.filter(|t| !t.trim().is_empty()),
            body,
            fetched_at: Utc::now(),
        }))
    }

    async fn render<B: BrowserSession>(
        &self,
        session: &mut B,
        url: &str,
    ) -> Result<Option<PageSnapshot>, AppError> {
        let navigation = tokio::time::timeout(self.nav_timeout, session.navigate(url));
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Ok(None),
            result = navigation => match result {
                Ok(loaded) => loaded?,
                Err(_) => {
                    return Err(AppError::NavigationTimeout {
                        target: url.to_string(),
                        secs: self.nav_timeout.as_secs(),
                    });
                }
            },
        }
        session.snapshot().await.map(Some)
    }

    /// Capture every target and upsert the pages.
    ///
    /// A target whose navigation or conversion fails is logged and skipped.
    pub async fn capture_all<S, R>(
        &self,
        source_id: &str,
        targets: &[String],
        auth_state: Option<&AuthState>,
        store: &S,
        reporter: &R,
    ) -> Result<CrawlSummary, AppError>
    where
        S: ContentStore,
        R: CrawlReporter,
    {
        if targets.is_empty() {
            return Err(AppError::ConfigError(format!(
                "No targets to capture for '{source_id}'"
            )));
        }

        let clock = Instant::now();
        let mut summary = CrawlSummary {
            source_id: source_id.to_string(),
            items_found: 0,
            items_new: 0,
            duration: Duration::ZERO,
            targets_failed: 0,
            interrupted: false,
        };

        for target in targets {
            if self.cancel_token.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            reporter.report(CrawlEvent::TargetStarted { source_id, target });
            let started_at = Utc::now();

            let (found, new) = match self.capture(source_id, target, auth_state).await {
                Ok(Some(page)) => {
                    let inserted = store.upsert_page(&page).await?;
                    (1, u64::from(inserted))
                }
                Ok(None) => {
                    summary.interrupted = true;
                    (0, 0)
                }
                Err(e) if e.is_target_failure() || matches!(e, AppError::CleanerError(_)) => {
                    summary.targets_failed += 1;
                    reporter.report(CrawlEvent::TargetFailed {
                        target,
                        error: &e.to_string(),
                    });
                    (0, 0)
                }
                Err(e) => return Err(e),
            };
            summary.items_found += found;
            summary.items_new += new;

            store
                .log_crawl(&CrawlLogEntry {
                    source_id: source_id.to_string(),
                    target: target.clone(),
                    items_found: found,
                    items_new: new,
                    started_at,
                    finished_at: Utc::now(),
                })
                .await?;
            if summary.interrupted {
                break;
            }
            if found > 0 {
                reporter.report(CrawlEvent::TargetFinished {
                    target,
                    found,
                    new,
                    stop: None,
                });
            }
        }

        if summary.interrupted {
            reporter.report(CrawlEvent::Interrupted {
                found: summary.items_found,
                new: summary.items_new,
            });
        }
        summary.duration = clock.elapsed();
        Ok(summary)
    }
}

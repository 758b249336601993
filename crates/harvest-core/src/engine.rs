use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::capture::CaptureBuffer;
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::models::Record;
use crate::pacing::PollBudget;
use crate::traits::{BrowserSession, CapturePredicate, CrawlSink, ParseFn, SessionDriver};

/// Consecutive no-growth scrolls tolerated before giving up.
pub const STAGNATION_LIMIT: u32 = 3;

/// Everything the engine needs to traverse one target.
#[derive(Clone)]
pub struct CrawlRequest {
    pub target: String,
    pub capture: CapturePredicate,
    pub parser: ParseFn,
    pub auth_state: Option<AuthState>,
    /// Records at or before this instant are treated as already known.
    pub since: Option<DateTime<Utc>>,
}

impl CrawlRequest {
    pub fn new(target: impl Into<String>, capture: CapturePredicate, parser: ParseFn) -> Self {
        Self {
            target: target.into(),
            capture,
            parser,
            auth_state: None,
            since: None,
        }
    }

    pub fn with_auth_state(mut self, auth_state: Option<AuthState>) -> Self {
        self.auth_state = auth_state;
        self
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }
}

impl std::fmt::Debug for CrawlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlRequest")
            .field("target", &self.target)
            .field("authenticated", &self.auth_state.is_some())
            .field("since", &self.since)
            .finish_non_exhaustive()
    }
}

/// Why the engine stopped scrolling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every record on the first page was already known.
    CaughtUp,
    /// Several scrolls in a row produced nothing new.
    Stagnated,
    /// The oldest record seen reached the cutoff.
    ReachedCutoff,
    /// The scroll cap was hit.
    MaxScrolls,
    /// The cancellation token fired.
    Cancelled,
}

/// Result of one engine run.
#[derive(Debug, Clone)]
pub struct EngineRun {
    /// Deduplicated, cutoff-filtered records, newest first.
    pub records: Vec<Record>,
    pub scrolls: u32,
    pub stop: StopReason,
}

/// Mutable state of one traversal.
#[derive(Default)]
struct Traversal {
    seen: Vec<Record>,
    /// Number of buffered payloads already parsed.
    consumed: usize,
    scrolls: u32,
}

/// Drives a single session against a single target: navigate, wait for
/// intercepted payloads, scroll until a stop condition holds, and stream every
/// newly parsed batch to a [`CrawlSink`] as it goes.
pub struct CrawlEngine<D> {
    driver: D,
    config: EngineConfig,
    cancel_token: CancellationToken,
}

impl<D: SessionDriver> CrawlEngine<D> {
    pub fn new(driver: D, config: EngineConfig) -> Self {
        Self {
            driver,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Traverse one target, streaming batches into `sink`.
    ///
    /// The session is closed exactly once on every path, including errors
    /// and cancellation. A sink error aborts the traversal and is returned.
    pub async fn run<S: CrawlSink>(
        &self,
        request: &CrawlRequest,
        sink: &mut S,
    ) -> Result<EngineRun, AppError> {
        let mut session = self
            .driver
            .open_session(request.auth_state.as_ref())
            .await?;

        let buffer = CaptureBuffer::new();
        session.on_response(buffer.hook(request.capture.clone()));

        let mut walk = Traversal::default();
        let outcome = self
            .drive(&mut session, request, &buffer, sink, &mut walk)
            .await;
        session.close().await;
        let stop = outcome?;

        let records = finalize(walk.seen, request.since);
        tracing::info!(
            url = %request.target,
            scrolls = walk.scrolls,
            items = records.len(),
            ?stop,
            "Target traversed"
        );

        Ok(EngineRun {
            records,
            scrolls: walk.scrolls,
            stop,
        })
    }

    async fn drive<B: BrowserSession, S: CrawlSink>(
        &self,
        session: &mut B,
        request: &CrawlRequest,
        buffer: &CaptureBuffer,
        sink: &mut S,
        walk: &mut Traversal,
    ) -> Result<StopReason, AppError> {
        tracing::debug!(url = %request.target, "Navigating");
        let navigation = tokio::time::timeout(
            self.config.nav_timeout,
            session.navigate(&request.target),
        );
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Ok(StopReason::Cancelled),
            result = navigation => match result {
                Ok(loaded) => loaded?,
                Err(_) => {
                    return Err(AppError::NavigationTimeout {
                        target: request.target.clone(),
                        secs: self.config.nav_timeout.as_secs(),
                    });
                }
            },
        }

        if !self.poll_for_growth(buffer, 0, self.config.initial_poll).await
            || !self.pause(self.config.settle_delay.sample()).await
        {
            return Ok(StopReason::Cancelled);
        }

        self.absorb(request, buffer, sink, walk).await?;

        if let Some(since) = request.since {
            if !walk.seen.is_empty() && walk.seen.iter().all(|r| r.timestamp <= since) {
                tracing::debug!(url = %request.target, "First page already known");
                return Ok(StopReason::CaughtUp);
            }
        }

        let mut stagnant = 0;
        while walk.scrolls < self.config.max_scrolls {
            let payloads_before = buffer.len();
            let items_before = walk.seen.len();

            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return Ok(StopReason::Cancelled),
                scrolled = session.scroll_once() => scrolled?,
            }
            walk.scrolls += 1;

            let delay = self.config.scroll_delay.sample() + self.config.request_jitter.sample();
            if !self.pause(delay).await
                || !self.pause(self.config.post_scroll_wait).await
                || !self
                    .poll_for_growth(buffer, payloads_before, self.config.scroll_poll)
                    .await
            {
                return Ok(StopReason::Cancelled);
            }

            self.absorb(request, buffer, sink, walk).await?;
            sink.on_progress(walk.scrolls, walk.seen.len());

            if walk.seen.len() == items_before {
                stagnant += 1;
                if stagnant >= STAGNATION_LIMIT {
                    return Ok(StopReason::Stagnated);
                }
            } else {
                stagnant = 0;
            }

            if let Some(since) = request.since {
                let oldest = walk.seen.iter().map(|r| r.timestamp).min();
                if oldest.is_some_and(|oldest| oldest <= since) {
                    return Ok(StopReason::ReachedCutoff);
                }
            }
        }

        Ok(StopReason::MaxScrolls)
    }

    /// Parse every payload not yet consumed and hand the new records to the sink.
    async fn absorb<S: CrawlSink>(
        &self,
        request: &CrawlRequest,
        buffer: &CaptureBuffer,
        sink: &mut S,
        walk: &mut Traversal,
    ) -> Result<(), AppError> {
        let payloads = buffer.tail(walk.consumed);
        walk.consumed += payloads.len();

        let batch: Vec<Record> = payloads
            .iter()
            .flat_map(|payload| parse_payload(&request.parser, payload))
            .collect();
        if batch.is_empty() {
            return Ok(());
        }

        sink.on_batch(&batch).await?;
        walk.seen.extend(batch);
        Ok(())
    }

    /// Wait until the buffer holds more than `baseline` payloads or the budget
    /// runs out. Returns false if cancelled.
    async fn poll_for_growth(
        &self,
        buffer: &CaptureBuffer,
        baseline: usize,
        budget: PollBudget,
    ) -> bool {
        for _ in 0..budget.attempts {
            if buffer.len() > baseline {
                return true;
            }
            if !self.pause(budget.interval).await {
                return false;
            }
        }
        !self.cancel_token.is_cancelled()
    }

    /// Sleep for `delay`. Returns false if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel_token.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

fn parse_payload(parser: &ParseFn, payload: &Value) -> Vec<Record> {
    catch_unwind(AssertUnwindSafe(|| parser(payload))).unwrap_or_else(|_| {
        tracing::warn!("Parser panicked; payload skipped");
        Vec::new()
    })
}

/// Deduplicate by id (first occurrence wins), drop known records, sort newest first.
pub fn finalize(records: Vec<Record>, since: Option<DateTime<Utc>>) -> Vec<Record> {
    let mut ids = HashSet::new();
    let mut unique: Vec<Record> = records
        .into_iter()
        .filter(|r| ids.insert(r.id.clone()))
        .filter(|r| since.is_none_or(|since| r.timestamp > since))
        .collect();
    // Stable: equal timestamps keep scroll order.
    unique.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    unique
}

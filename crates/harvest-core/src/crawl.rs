use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::auth::AuthState;
use crate::engine::{CrawlEngine, CrawlRequest, StopReason};
use crate::error::AppError;
use crate::models::{CrawlLogEntry, CrawlSummary, Record};
use crate::traits::{CapturePredicate, ContentStore, CrawlSink, ParseFn, SessionDriver};

/// Events emitted during a crawl for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    TargetStarted {
        source_id: &'a str,
        target: &'a str,
    },
    Progress {
        target: &'a str,
        scroll: u32,
        total_seen: usize,
    },
    BatchStored {
        target: &'a str,
        found: usize,
        new: u64,
    },
    TargetFinished {
        target: &'a str,
        found: u64,
        new: u64,
        /// Unset for single-shot captures that never scroll.
        stop: Option<StopReason>,
    },
    TargetFailed {
        target: &'a str,
        error: &'a str,
    },
    Interrupted {
        found: u64,
        new: u64,
    },
}

/// Trait for receiving crawl events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::TargetStarted { source_id, target } => {
                tracing::info!(%source_id, url = %target, "Crawling target");
            }
            CrawlEvent::Progress {
                target,
                scroll,
                total_seen,
            } => {
                tracing::info!(url = %target, scroll, total_seen, "Scrolled");
            }
            CrawlEvent::BatchStored { target, found, new } => {
                tracing::debug!(url = %target, found, new, "Batch stored");
            }
            CrawlEvent::TargetFinished {
                target,
                found,
                new,
                stop,
            } => {
                tracing::info!(url = %target, found, new, ?stop, "Target finished");
            }
            CrawlEvent::TargetFailed { target, error } => {
                tracing::warn!(url = %target, %error, "Target failed");
            }
            CrawlEvent::Interrupted { found, new } => {
                tracing::warn!(found, new, "Crawl interrupted");
            }
        }
    }
}

/// One crawl invocation: an adapter's capture/parse pair applied to its targets.
#[derive(Clone)]
pub struct CrawlJob {
    pub source_id: String,
    pub targets: Vec<String>,
    pub capture: CapturePredicate,
    pub parser: ParseFn,
    pub auth_state: Option<AuthState>,
    /// Explicit cutoff. When unset, the newest stored timestamp is used.
    pub since: Option<DateTime<Utc>>,
    /// Restricts the derived cutoff to one author's records.
    pub author_scope: Option<String>,
}

/// Sink that upserts every batch as soon as it is parsed.
struct StoreSink<'a, S, R> {
    store: &'a S,
    reporter: &'a R,
    target: &'a str,
    found: u64,
    new: u64,
}

impl<S: ContentStore, R: CrawlReporter> CrawlSink for StoreSink<'_, S, R> {
    async fn on_batch(&mut self, records: &[Record]) -> Result<(), AppError> {
        let inserted = self.store.upsert_records(records).await?;
        self.found += records.len() as u64;
        self.new += inserted;
        self.reporter.report(CrawlEvent::BatchStored {
            target: self.target,
            found: records.len(),
            new: inserted,
        });
        Ok(())
    }

    fn on_progress(&mut self, scroll: u32, total_seen: usize) {
        self.reporter.report(CrawlEvent::Progress {
            target: self.target,
            scroll,
            total_seen,
        });
    }
}

/// Runs the engine over every target of a job, persisting as it goes.
pub struct CrawlService<D, S> {
    engine: CrawlEngine<D>,
    store: S,
}

impl<D, S> CrawlService<D, S>
where
    D: SessionDriver,
    S: ContentStore,
{
    pub fn new(engine: CrawlEngine<D>, store: S) -> Self {
        Self { engine, store }
    }

    pub fn engine(&self) -> &CrawlEngine<D> {
        &self.engine
    }

    /// Crawl every target in order.
    ///
    /// Target failures (navigation, timeout, browser) are reported and
    /// skipped; store errors abort the run. Cancellation ends the run early
    /// with `interrupted` set; everything already streamed stays stored.
    pub async fn crawl<R: CrawlReporter>(
        &self,
        job: &CrawlJob,
        reporter: &R,
    ) -> Result<CrawlSummary, AppError> {
        if job.targets.is_empty() {
            return Err(AppError::ConfigError(format!(
                "No targets to crawl for '{}'",
                job.source_id
            )));
        }

        let clock = Instant::now();
        let since = match job.since {
            Some(since) => Some(since),
            None => {
                self.store
                    .latest_timestamp(&job.source_id, job.author_scope.as_deref())
                    .await?
            }
        };
        if let Some(since) = since {
            tracing::debug!(source_id = %job.source_id, %since, "Incremental crawl");
        }

        let mut summary = CrawlSummary {
            source_id: job.source_id.clone(),
            items_found: 0,
            items_new: 0,
            duration: Default::default(),
            targets_failed: 0,
            interrupted: false,
        };

        for target in &job.targets {
            if self.engine.cancel_token().is_cancelled() {
                summary.interrupted = true;
                break;
            }
            reporter.report(CrawlEvent::TargetStarted {
                source_id: &job.source_id,
                target,
            });

            let request = CrawlRequest::new(target.as_str(), job.capture.clone(), job.parser.clone())
                .with_auth_state(job.auth_state.clone())
                .with_since(since);
            let mut sink = StoreSink {
                store: &self.store,
                reporter,
                target,
                found: 0,
                new: 0,
            };

            let started_at = Utc::now();
            let result = self.engine.run(&request, &mut sink).await;
            let (found, new) = (sink.found, sink.new);
            summary.items_found += found;
            summary.items_new += new;

            let logged = self
                .store
                .log_crawl(&CrawlLogEntry {
                    source_id: job.source_id.clone(),
                    target: target.clone(),
                    items_found: found,
                    items_new: new,
                    started_at,
                    finished_at: Utc::now(),
                })
                .await;

            match result {
                Ok(run) => {
                    logged?;
                    reporter.report(CrawlEvent::TargetFinished {
                        target,
                        found,
                        new,
                        stop: Some(run.stop),
                    });
                    if run.stop == StopReason::Cancelled {
                        summary.interrupted = true;
                        break;
                    }
                }
                Err(e) if e.is_target_failure() => {
                    logged?;
                    summary.targets_failed += 1;
                    reporter.report(CrawlEvent::TargetFailed {
                        target,
                        error: &e.to_string(),
                    });
                }
                Err(e) => {
                    if let Err(log_err) = logged {
                        tracing::warn!(url = %target, error = %log_err, "Could not record crawl log");
                    }
                    return Err(e);
                }
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

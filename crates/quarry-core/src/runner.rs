//! Run orchestration: validate, acquire content, interpret, finalize, persist.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FetcherKind, ScrapeConfig};
use crate::context::ExecutionContext;
use crate::error::AppError;
use crate::executor::{Executor, ExecutorConfig};
use crate::extract::extract_json;
use crate::instruction::Instruction;
use crate::models::{PendingResult, RecordError, RunMode, RunOutcome, ScrapeResult, SubmitReport};
use crate::processor::ProcessorRegistry;
use crate::static_page::StaticPage;
use crate::traits::{Fetcher, RecordStore, Session};
use crate::validate::validate_config;

/// Where a run gets its content from.
pub enum ContentSource<F: Fetcher, S: Session> {
    /// One fetched HTML document.
    SingleShot(F),
    /// A live interactive session.
    Session(S),
    /// One fetched JSON payload.
    Structured(F),
}

impl<F: Fetcher, S: Session> ContentSource<F, S> {
    pub fn mode(&self) -> RunMode {
        match self {
            ContentSource::SingleShot(_) => RunMode::SingleShot,
            ContentSource::Session(_) => RunMode::Session,
            ContentSource::Structured(_) => RunMode::Structured,
        }
    }

    async fn cleanup(&mut self) {
        match self {
            ContentSource::SingleShot(f) | ContentSource::Structured(f) => f.cleanup().await,
            ContentSource::Session(s) => s.cleanup().await,
        }
    }
}

/// The run mode a fetcher type calls for.
pub fn mode_for(kind: FetcherKind) -> RunMode {
    match kind {
        FetcherKind::Static => RunMode::SingleShot,
        FetcherKind::Session => RunMode::Session,
        FetcherKind::Api => RunMode::Structured,
    }
}

/// Events emitted during a run.
#[derive(Debug)]
pub enum RunEvent<'a> {
    Started {
        run_id: Uuid,
        scraper: &'a str,
        mode: RunMode,
    },
    ContentLoaded {
        run_id: Uuid,
        url: &'a str,
        bytes: usize,
    },
    Cancelled {
        run_id: Uuid,
    },
    Failed {
        run_id: Uuid,
        error: &'a AppError,
    },
    Finished {
        result: &'a ScrapeResult,
    },
    Persisted {
        run_id: Uuid,
        report: &'a SubmitReport,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait RunReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Started {
                run_id,
                scraper,
                mode,
            } => {
                tracing::info!(%run_id, %scraper, mode = mode.as_str(), "Run started");
            }
            RunEvent::ContentLoaded { run_id, url, bytes } => {
                tracing::info!(%run_id, %url, bytes, "Initial content loaded");
            }
            RunEvent::Cancelled { run_id } => {
                tracing::warn!(%run_id, "Run cancelled");
            }
            RunEvent::Failed { run_id, error } => {
                tracing::error!(%run_id, %error, "Run failed");
            }
            RunEvent::Finished { result } => {
                let m = &result.metadata;
                tracing::info!(
                    run_id = %result.run_id,
                    events = m.total_events,
                    markets = m.total_markets,
                    selections = m.total_selections,
                    other = m.total_other,
                    errors = m.error_count,
                    duration_ms = m.duration_ms,
                    "Run finished"
                );
            }
            RunEvent::Persisted { run_id, report } => {
                tracing::info!(
                    %run_id,
                    persisted = report.persisted,
                    failed = report.errors.len(),
                    "Results persisted"
                );
            }
        }
    }
}

/// Runs scraper configurations.
///
/// Holds only shared, immutable state, so one runner can drive many
/// concurrent runs.
#[derive(Clone)]
pub struct Runner<St: RecordStore> {
    registry: Arc<ProcessorRegistry>,
    executor_config: ExecutorConfig,
    store: Option<St>,
}

impl<St: RecordStore> Runner<St> {
    /// Create a runner without persistence.
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            registry,
            executor_config: ExecutorConfig::default(),
            store: None,
        }
    }

    /// Create a runner that hands finalized results to `store`.
    pub fn with_store(registry: Arc<ProcessorRegistry>, store: St) -> Self {
        Self {
            registry,
            executor_config: ExecutorConfig::default(),
            store: Some(store),
        }
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn validate(&self, config: &ScrapeConfig) -> Result<(), Vec<String>> {
        validate_config(config, &self.registry)
    }

    /// Run `config` to completion.
    pub async fn run<F: Fetcher, S: Session>(
        &self,
        config: &ScrapeConfig,
        source: ContentSource<F, S>,
    ) -> Result<RunOutcome, AppError> {
        self.run_with_cancel(config, source, CancellationToken::new(), &TracingRunReporter)
            .await
    }

    /// Run `config`, stopping early when `cancel` fires.
    ///
    /// The content source is cleaned up exactly once whatever happens. Only
    /// an invalid configuration or a failed initial fetch produce an `Err`;
    /// every other failure ends up in the result's error list.
    pub async fn run_with_cancel<F: Fetcher, S: Session, R: RunReporter>(
        &self,
        config: &ScrapeConfig,
        mut source: ContentSource<F, S>,
        cancel: CancellationToken,
        reporter: &R,
    ) -> Result<RunOutcome, AppError> {
        if let Err(errors) = self.validate(config) {
            source.cleanup().await;
            return Err(AppError::ConfigValidation(errors));
        }
        let mode = source.mode();
        let expected = mode_for(config.fetcher.kind);
        if mode != expected {
            source.cleanup().await;
            return Err(AppError::ConfigError(format!(
                "fetcher type `{}` needs a {} content source, got {}",
                config.fetcher.kind.as_str(),
                expected.as_str(),
                mode.as_str()
            )));
        }

        let run_id = Uuid::new_v4();
        reporter.report(RunEvent::Started {
            run_id,
            scraper: &config.meta.name,
            mode,
        });
        let mut pending = PendingResult::start(run_id, &config.meta.name, mode);
        let mut ctx = ExecutionContext::new(&config.meta.start_url);

        let outcome = tokio::select! {
            outcome = self.execute_source(run_id, config, &source, &mut ctx, &mut pending, reporter) => Some(outcome),
            () = cancel.cancelled() => None,
        };
        source.cleanup().await;

        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                reporter.report(RunEvent::Failed { run_id, error: &e });
                return Err(e);
            }
            None => {
                reporter.report(RunEvent::Cancelled { run_id });
                ctx.record_error("run cancelled");
            }
        }

        let (grouped, errors, missing_required) = ctx.into_parts();
        for (bucket, records) in grouped {
            pending.add_records(bucket, records);
        }
        pending.add_errors(errors);
        pending.add_missing_required(missing_required);
        let result = pending.finalize();
        reporter.report(RunEvent::Finished { result: &result });

        let persistence = self.persist(config, &result, reporter).await;
        Ok(RunOutcome {
            result,
            persistence,
        })
    }

    async fn execute_source<F: Fetcher, S: Session, R: RunReporter>(
        &self,
        run_id: Uuid,
        config: &ScrapeConfig,
        source: &ContentSource<F, S>,
        ctx: &mut ExecutionContext,
        pending: &mut PendingResult,
        reporter: &R,
    ) -> Result<(), AppError> {
        let start_url = config.meta.start_url.as_str();
        let allowed = config.meta.allowed_domains.as_slice();

        match source {
            ContentSource::Session(session) => {
                let nav_timeout = self.executor_config.navigation_timeout;
                let page = timeout(nav_timeout, session.navigate(start_url))
                    .await
                    .map_err(|_| AppError::Timeout(nav_timeout.as_millis() as u64))??;
                pending.set_initial_fetch_bytes(page.body.len());
                reporter.report(RunEvent::ContentLoaded {
                    run_id,
                    url: &page.url,
                    bytes: page.body.len(),
                });

                let executor = Executor::new(session, &self.registry, &self.executor_config, allowed);
                executor.execute_all(&config.instructions, ctx).await;
            }
            ContentSource::SingleShot(fetcher) => {
                let page = fetcher.fetch(start_url).await?;
                pending.set_initial_fetch_bytes(page.body.len());
                reporter.report(RunEvent::ContentLoaded {
                    run_id,
                    url: &page.url,
                    bytes: page.body.len(),
                });

                let document = StaticPage::from_fetched(page);
                let executor =
                    Executor::new(&document, &self.registry, &self.executor_config, allowed);
                executor.execute_all(&config.instructions, ctx).await;
            }
            ContentSource::Structured(fetcher) => {
                let page = fetcher.fetch(start_url).await?;
                pending.set_initial_fetch_bytes(page.body.len());
                reporter.report(RunEvent::ContentLoaded {
                    run_id,
                    url: &page.url,
                    bytes: page.body.len(),
                });

                let payload: Value = serde_json::from_str(&page.body)?;
                let pctx = ctx.processor_context(Some(&page.url));
                for (index, instruction) in config.instructions.iter().enumerate() {
                    let Instruction::Collect(collect) = instruction else {
                        debug!(
                            index,
                            instruction = instruction.kind(),
                            "Skipping non-collect instruction for structured content"
                        );
                        continue;
                    };
                    match extract_json(&payload, collect, &self.registry, &pctx) {
                        Ok(items) => {
                            let added = ctx.append(collect, items);
                            info!(collection = %collect.name, added, "Collected items");
                        }
                        Err(e) => ctx.record_error(format!("collect `{}`: {e}", collect.name)),
                    }
                }
            }
        }
        Ok(())
    }

    async fn persist<R: RunReporter>(
        &self,
        config: &ScrapeConfig,
        result: &ScrapeResult,
        reporter: &R,
    ) -> Option<SubmitReport> {
        if !config.persistence.enabled {
            debug!("Persistence disabled for this scraper");
            return None;
        }
        let store = self.store.as_ref()?;

        let report = match store.submit(result).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Result could not be persisted");
                SubmitReport {
                    persisted: 0,
                    errors: result
                        .records()
                        .map(|(bucket, record)| RecordError {
                            bucket,
                            collection: record.collection.clone(),
                            key: record.key.clone(),
                            message: e.to_string(),
                        })
                        .collect(),
                }
            }
        };
        for failure in &report.errors {
            warn!(
                collection = %failure.collection,
                key = %failure.key,
                error = %failure.message,
                "Record not persisted"
            );
        }
        reporter.report(RunEvent::Persisted {
            run_id: result.run_id,
            report: &report,
        });
        Some(report)
    }
}

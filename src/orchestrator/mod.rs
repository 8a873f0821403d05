//! Per-URL pipeline and batch runner
//!
//! For each candidate URL the [`Orchestrator`] walks:
//!
//! ```text
//! Pending ─┬─> Skipped                                   (already in ledger)
//!          └─> Submitted ─> Polling ─┬─> Downloaded ─┬─> Recorded
//!                                    │               └─> DownloadFailed
//!                                    └─> Failed      (job ended, error, deadline)
//! ```
//!
//! A URL is appended to the ledger only after every file of its payload is on disk.
//! Any other outcome leaves it eligible for the next run.

use crate::config::Config;
use crate::download::DownloadEngine;
use crate::error::{Error, Result};
use crate::job_service::{Completion, HttpJobService, JobService, SubmitOptions, await_completion};
use crate::ledger::Ledger;
use crate::source::UrlSource;
use crate::types::{DownloadedFile, Event, RunSummary, Stage, UrlOutcome};
use crate::utils::cancellable;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Drives candidate URLs through submit, poll, download and record
pub struct Orchestrator {
    config: Config,
    service: Arc<dyn JobService>,
    engine: DownloadEngine,
    ledger: Ledger,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("ledger", &self.ledger)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator talking HTTP to the configured service
    ///
    /// Loads the ledger from `config.ledger_path`; a missing ledger file starts empty.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let service = Arc::new(HttpJobService::new(&config.service, config.retry.clone())?);
        let engine = DownloadEngine::new(&config.download, event_tx.clone())?;
        let ledger = Ledger::load(&config.ledger_path).await?;
        tracing::info!(
            ledger = ?ledger.path(),
            recorded = ledger.len(),
            download_dir = ?config.download.download_dir,
            "orchestrator ready"
        );

        Ok(Self::from_parts(config, service, engine, ledger, event_tx))
    }

    /// Assemble an orchestrator from prebuilt components
    ///
    /// `event_tx` should be the same sender the engine was built with so that
    /// subscribers see download progress alongside pipeline events.
    pub fn from_parts(
        config: Config,
        service: Arc<dyn JobService>,
        engine: DownloadEngine,
        ledger: Ledger,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            service,
            engine,
            ledger,
            event_tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    ///
    /// The URL in flight fails (and is not recorded); remaining URLs are not attempted.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The ledger of processed URLs
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run the full pipeline for one URL
    ///
    /// Per-URL failures are reported as [`UrlOutcome::Failed`]; only fatal errors
    /// (see [`Error::is_fatal`]) are returned as `Err`.
    pub async fn process_url(&mut self, url: &str) -> Result<UrlOutcome> {
        let url = url.trim();
        if self.ledger.contains(url) {
            tracing::info!(url = %url, "skipping already downloaded URL");
            self.emit(Event::Skipped {
                url: url.to_string(),
            });
            return Ok(UrlOutcome::Skipped);
        }

        let deadline = self.config.poll.job_deadline.filter(|d| !d.is_zero());
        let url_cancel = self.shutdown.child_token();
        let mut stage = Stage::Submit;

        let result = match deadline {
            None => self.pipeline(url, &url_cancel, &mut stage).await,
            Some(limit) => {
                let pipeline = self.pipeline(url, &url_cancel, &mut stage);
                tokio::pin!(pipeline);
                tokio::select! {
                    result = &mut pipeline => result,
                    _ = tokio::time::sleep(limit) => {
                        // Let the pipeline observe cancellation so it can clean up
                        url_cancel.cancel();
                        match pipeline.await {
                            Err(Error::Cancelled) => Err(Error::DeadlineExceeded(limit)),
                            other => other,
                        }
                    }
                }
            }
        };

        match result {
            Ok(files) => {
                tracing::info!(url = %url, files = files.len(), "successfully downloaded and saved");
                self.emit(Event::Recorded {
                    url: url.to_string(),
                    files: files.len(),
                });
                Ok(UrlOutcome::Recorded { files })
            }
            Err(e) => {
                self.emit(Event::Failed {
                    url: url.to_string(),
                    stage,
                    error: e.to_string(),
                });
                if e.is_fatal() {
                    tracing::error!(url = %url, stage = %stage, error = %e, "fatal error, aborting run");
                    return Err(e);
                }
                tracing::warn!(url = %url, stage = %stage, error = %e, "failed to process URL");
                Ok(UrlOutcome::Failed {
                    stage,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn pipeline(
        &mut self,
        url: &str,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<Vec<DownloadedFile>> {
        *stage = Stage::Submit;
        let options = SubmitOptions {
            iphone: self.config.service.iphone,
        };
        let job_id = cancellable(cancel, self.service.submit(url, options)).await?;
        tracing::info!(url = %url, job_id = %job_id, "submitted URL");
        self.emit(Event::Submitted {
            url: url.to_string(),
            job_id: job_id.clone(),
        });

        *stage = Stage::Poll;
        let completion = await_completion(
            self.service.as_ref(),
            &job_id,
            self.config.poll.interval,
            cancel,
            &self.event_tx,
        )
        .await?;
        let payload = match completion {
            Completion::Complete(payload) => payload,
            Completion::Ended(status) => return Err(Error::JobIncomplete { job_id, status }),
        };
        if payload.is_empty() {
            tracing::info!(url = %url, job_id = %job_id, "job completed with an empty payload");
        }

        *stage = Stage::Download;
        let files = self
            .engine
            .download_payload(&payload, &self.config.download.download_dir, cancel)
            .await?;

        *stage = Stage::Record;
        self.ledger.append(url).await?;
        Ok(files)
    }

    /// Process `urls` in order, skipping those already recorded
    ///
    /// One URL's failure never stops the batch. The run ends early only on a fatal
    /// error (returned as `Err`) or when the shutdown token is cancelled (reported via
    /// [`RunSummary::interrupted`]).
    pub async fn run<I, S>(&mut self, urls: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();
        let mut interrupted = false;

        for url in urls {
            let url = url.as_ref().trim();
            if url.is_empty() {
                continue;
            }
            if self.shutdown.is_cancelled() {
                tracing::warn!("shutdown requested, leaving remaining URLs for the next run");
                interrupted = true;
                break;
            }

            let outcome = self.process_url(url).await?;
            let stop = matches!(outcome, UrlOutcome::Failed { .. }) && self.shutdown.is_cancelled();
            outcomes.push((url.to_string(), outcome));
            if stop {
                tracing::warn!("shutdown requested, leaving remaining URLs for the next run");
                interrupted = true;
                break;
            }
        }

        let summary = RunSummary {
            outcomes,
            interrupted,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            skipped = summary.skipped(),
            recorded = summary.recorded(),
            failed = summary.failed(),
            interrupted,
            "run finished"
        );
        self.emit(Event::RunFinished {
            skipped: summary.skipped(),
            recorded: summary.recorded(),
            failed: summary.failed(),
            interrupted,
        });
        Ok(summary)
    }

    /// Log in to `source`, process its URLs, then log out
    ///
    /// A login failure aborts before any URL is touched. A failure to list URLs is
    /// logged and treated as an empty batch. Logout failures are only logged.
    pub async fn run_source(&mut self, source: &dyn UrlSource) -> Result<RunSummary> {
        source.login().await.map_err(|e| match e {
            Error::Auth(_) => e,
            other => Error::Auth(other.to_string()),
        })?;
        tracing::info!(source = source.name(), "logged in to URL source");

        let urls = match source.candidate_urls().await {
            Ok(urls) => {
                tracing::info!(source = source.name(), count = urls.len(), "extracted candidate URLs");
                urls
            }
            Err(e) => {
                tracing::error!(source = source.name(), error = %e, "error extracting URLs");
                Vec::new()
            }
        };

        let result = self.run(urls).await;

        if let Err(e) = source.logout().await {
            tracing::warn!(source = source.name(), error = %e, "logout failed");
        }
        result
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

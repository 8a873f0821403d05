//! Job submission and status polling against the media processing service
//!
//! [`JobService`] is the seam between the orchestrator and the remote service;
//! [`HttpJobService`] is the production implementation. [`await_completion`] drives the
//! poll loop for any implementation.

mod http;

pub use http::HttpJobService;

use crate::error::{Error, Result};
use crate::types::{Event, FileDescriptor, Job, JobId, JobStatus};
use crate::utils::cancellable;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Presentation flags sent along with a submission
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Ask the service to render media for iPhone playback
    pub iphone: bool,
}

/// Remote processing service
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit `url` for processing and return the created job's identifier
    ///
    /// # Errors
    ///
    /// - [`Error::Service`] on transport failure, non-success status or malformed body
    /// - [`Error::MissingJobId`] when the response carries no job identifier
    async fn submit(&self, url: &str, options: SubmitOptions) -> Result<JobId>;

    /// Fetch the current status (and payload, once complete) of a job
    ///
    /// # Errors
    ///
    /// [`Error::Service`] on transport failure, non-success status or malformed body.
    async fn poll_status(&self, job_id: &JobId) -> Result<Job>;
}

/// Terminal result of waiting on a job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Job completed; possibly with zero files
    Complete(Vec<FileDescriptor>),
    /// Job ended with a status other than `complete`
    Ended(String),
}

/// Poll `job_id` every `poll_interval` until it leaves the `working` state
///
/// Returns [`Completion::Complete`] as soon as the job completes (a missing payload
/// counts as zero files) and [`Completion::Ended`] for any other terminal status. A
/// job that ends badly is not an error of the client.
///
/// There is no built-in timeout: callers bound the wait through `cancel`, which
/// interrupts both in-flight polls and the sleep between them.
///
/// # Errors
///
/// - [`Error::Cancelled`] when `cancel` fires
/// - any error returned by [`JobService::poll_status`]
pub async fn await_completion(
    service: &dyn JobService,
    job_id: &JobId,
    poll_interval: Duration,
    cancel: &CancellationToken,
    event_tx: &broadcast::Sender<Event>,
) -> Result<Completion> {
    let mut polls: u32 = 0;
    loop {
        let job = cancellable(cancel, service.poll_status(job_id)).await?;
        polls += 1;

        tracing::debug!(job_id = %job_id, status = %job.status, polls, "polled job status");
        event_tx
            .send(Event::JobStatus {
                job_id: job_id.clone(),
                status: job.status.to_string(),
            })
            .ok();

        if !job.status.is_terminal() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
            continue;
        }

        if job.status == JobStatus::Complete {
            let payload = job.payload.unwrap_or_default();
            tracing::info!(job_id = %job_id, files = payload.len(), polls, "job complete");
            return Ok(Completion::Complete(payload));
        }

        let status = job.status.to_string();
        tracing::warn!(job_id = %job_id, status = %status, "job ended without completing");
        return Ok(Completion::Ended(status));
    }
}

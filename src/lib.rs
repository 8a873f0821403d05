//! # mediahook-dl
//!
//! Batch pipeline that turns shared media links into downloaded files.
//!
//! Each candidate URL is submitted to a remote processing service, the resulting job
//! is polled until it finishes, every file of the job's payload is streamed to the
//! download directory, and only then is the URL appended to an on-disk ledger so later
//! runs skip it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mediahook_dl::{Config, Orchestrator, StaticUrlSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.service.base_url = "http://localhost:8080".to_string();
//!
//!     let mut orchestrator = Orchestrator::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let source = StaticUrlSource::new(["https://example.com/reel/1"]);
//!     let summary = orchestrator.run_source(&source).await?;
//!     println!("recorded {} URLs", summary.recorded());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Streaming download of job payloads
pub mod download;
/// Error types
pub mod error;
/// Job submission and status polling
pub mod job_service;
/// Ledger of processed URLs
pub mod ledger;
/// Per-URL pipeline and batch runner
pub mod orchestrator;
/// Retry logic with exponential backoff
pub mod retry;
/// Candidate URL sources
pub mod source;
/// Core types
pub mod types;
/// Shared helpers
pub mod utils;

pub use config::{Config, DownloadConfig, PollConfig, RetryConfig, ServiceConfig};
pub use download::{DownloadEngine, IdGenerator, UuidGenerator};
pub use error::{Error, Result};
pub use job_service::{Completion, HttpJobService, JobService, SubmitOptions, await_completion};
pub use ledger::Ledger;
pub use orchestrator::Orchestrator;
pub use source::{FileUrlSource, StaticUrlSource, UrlSource};
pub use types::{
    DownloadedFile, Event, FileDescriptor, Job, JobId, JobStatus, RunSummary, Stage, UrlOutcome,
};

/// Run `source` through `orchestrator`, stopping early on SIGTERM or SIGINT
///
/// On a signal the URL in flight is abandoned (not recorded) and the remaining URLs
/// are left for the next run; the returned summary has `interrupted` set.
///
/// # Example
///
/// ```no_run
/// use mediahook_dl::{Config, FileUrlSource, Orchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env()?;
///     let orchestrator = Orchestrator::new(config).await?;
///
///     let summary = run_with_shutdown(orchestrator, &FileUrlSource::new("urls.txt")).await?;
///     println!("interrupted: {}", summary.interrupted);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    mut orchestrator: Orchestrator,
    source: &dyn UrlSource,
) -> Result<RunSummary> {
    let shutdown = orchestrator.shutdown_token();
    let watcher = tokio::spawn(async move {
        if wait_for_signal().await {
            shutdown.cancel();
        }
    });

    let result = orchestrator.run_source(source).await;
    watcher.abort();
    result
}

/// Resolves once a termination signal arrives; `false` if no handler could be installed
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
            true
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
            true
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
            true
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.is_ok()
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            false
        }
    }
}

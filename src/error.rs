//! Error types for mediahook-dl
//!
//! A single [`Error`] enum covers every failure the pipeline can report. Errors fall in
//! two groups:
//! - **Per-URL** errors (service, job, transfer, deadline) fail only the URL being
//!   processed; the orchestrator logs them and moves on to the next URL.
//! - **Fatal** errors (config, auth, ledger write) abort the whole run, see
//!   [`Error::is_fatal`].

use crate::types::JobId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for mediahook-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mediahook-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "MEDIAHOOK_BASE_URL")
        key: Option<String>,
    },

    /// Upstream URL source rejected our credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Upstream URL source could not produce candidate URLs
    #[error("failed to extract candidate URLs: {0}")]
    SourceExtraction(String),

    /// Job submission or status request failed (transport, HTTP status or malformed body)
    #[error("job service error at {endpoint}: {message}")]
    Service {
        /// The endpoint path that was called (e.g., "/hooks/media")
        endpoint: String,
        /// HTTP status code, if a response was received
        status: Option<u16>,
        /// Human-readable description
        message: String,
        /// Whether the failure looks transient (timeout, connect failure, 5xx)
        transient: bool,
    },

    /// Submission succeeded but the response carried no job identifier
    #[error("job service returned no job id")]
    MissingJobId,

    /// Job reached a terminal state other than `complete`
    #[error("job {job_id} ended with status {status:?}")]
    JobIncomplete {
        /// The job that did not complete
        job_id: JobId,
        /// The terminal status reported by the service
        status: String,
    },

    /// Downloading a payload file failed
    #[error("transfer of {url} failed: {message}")]
    Transfer {
        /// The remote file location
        url: String,
        /// Human-readable description
        message: String,
    },

    /// Appending to the ledger failed; processed-URL accounting cannot continue
    #[error("failed to write ledger {path}: {source}")]
    LedgerWrite {
        /// Path of the ledger file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Processing was cancelled (shutdown requested)
    #[error("cancelled")]
    Cancelled,

    /// Processing a single URL took longer than the configured deadline
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl Error {
    /// Build a [`Error::Service`] from a reqwest transport error
    pub(crate) fn service_transport(endpoint: &str, err: &reqwest::Error) -> Self {
        Error::Service {
            endpoint: endpoint.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            transient: err.is_timeout() || err.is_connect(),
        }
    }

    /// Build a [`Error::Service`] for a non-success HTTP status
    pub(crate) fn service_status(endpoint: &str, status: reqwest::StatusCode) -> Self {
        Error::Service {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: format!("unexpected HTTP status {status}"),
            transient: status.is_server_error(),
        }
    }

    /// Build a [`Error::Service`] for a response body that does not match the protocol
    pub(crate) fn service_malformed(endpoint: &str, message: impl Into<String>) -> Self {
        Error::Service {
            endpoint: endpoint.to_string(),
            status: None,
            message: message.into(),
            transient: false,
        }
    }

    /// Returns true when the error must abort the whole run rather than a single URL
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::Auth(_) | Error::LedgerWrite { .. }
        )
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_config_auth_and_ledger() {
        let fatal = [
            Error::Config {
                message: "missing".into(),
                key: Some("MEDIAHOOK_BASE_URL".into()),
            },
            Error::Auth("bad password".into()),
            Error::LedgerWrite {
                path: PathBuf::from("/tmp/ledger.txt"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            },
        ];
        for err in fatal {
            assert!(err.is_fatal(), "{err} should be fatal");
        }

        let per_url = [
            Error::MissingJobId,
            Error::SourceExtraction("inbox unavailable".into()),
            Error::service_malformed("/hooks/media", "not json"),
            Error::JobIncomplete {
                job_id: JobId::from("j1"),
                status: "failed".into(),
            },
            Error::Transfer {
                url: "https://cdn/a.mp4".into(),
                message: "reset".into(),
            },
            Error::Cancelled,
            Error::DeadlineExceeded(Duration::from_secs(5)),
        ];
        for err in per_url {
            assert!(!err.is_fatal(), "{err} should only fail the current URL");
        }
    }

    #[test]
    fn service_status_marks_server_errors_transient() {
        let busy = Error::service_status("/api/v1/job_status/j1", reqwest::StatusCode::BAD_GATEWAY);
        let missing = Error::service_status("/api/v1/job_status/j1", reqwest::StatusCode::NOT_FOUND);

        match busy {
            Error::Service {
                status, transient, ..
            } => {
                assert_eq!(status, Some(502));
                assert!(transient);
            }
            other => panic!("expected Service error, got {other:?}"),
        }
        match missing {
            Error::Service {
                status, transient, ..
            } => {
                assert_eq!(status, Some(404));
                assert!(!transient, "404 is a permanent failure");
            }
            other => panic!("expected Service error, got {other:?}"),
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::JobIncomplete {
            job_id: JobId::from("abc"),
            status: "error".into(),
        };
        assert_eq!(err.to_string(), "job abc ended with status \"error\"");

        let err = Error::Transfer {
            url: "https://cdn/x.jpg".into(),
            message: "HTTP 500".into(),
        };
        assert!(err.to_string().contains("https://cdn/x.jpg"));
    }
}

//! Core types for mediahook-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque identifier of a job on the processing service
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job status as reported by the processing service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Still being processed
    Working,
    /// Finished, payload available
    Complete,
    /// Any other status; terminal failure. Holds the raw status string.
    Failed(String),
}

impl JobStatus {
    /// Parse the service's status string
    pub fn parse(status: &str) -> Self {
        match status {
            "working" => JobStatus::Working,
            "complete" => JobStatus::Complete,
            other => JobStatus::Failed(other.to_string()),
        }
    }

    /// The wire representation of this status
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Working => "working",
            JobStatus::Complete => "complete",
            JobStatus::Failed(raw) => raw,
        }
    }

    /// Whether polling should stop
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Working)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote location (and optional display name) of one result file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Remote URL of the file
    pub path: String,
    /// Original file name, if the service reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileDescriptor {
    /// Descriptor without a display name
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Snapshot of a job returned by a status poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Result files; only meaningful once the job is complete
    pub payload: Option<Vec<FileDescriptor>>,
}

/// A result file persisted to the download directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// Remote URL the file was fetched from
    pub source: String,
    /// Final on-disk location
    pub path: PathBuf,
    /// Number of bytes written
    pub bytes: u64,
    /// When the file was completed
    pub saved_at: DateTime<Utc>,
}

/// Pipeline stage at which a URL failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Submitting the URL to the job service
    Submit,
    /// Waiting for the job to finish
    Poll,
    /// Downloading payload files
    Download,
    /// Recording the URL in the ledger
    Record,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Submit => "submit",
            Stage::Poll => "poll",
            Stage::Download => "download",
            Stage::Record => "record",
        };
        f.write_str(s)
    }
}

/// Result of handling one candidate URL
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UrlOutcome {
    /// Already in the ledger; nothing was done
    Skipped,
    /// All payload files downloaded and URL appended to the ledger
    Recorded {
        /// Files written for this URL
        files: Vec<DownloadedFile>,
    },
    /// Processing failed; URL stays eligible for a later run
    Failed {
        /// Stage that failed
        stage: Stage,
        /// Human-readable cause
        error: String,
    },
}

/// Aggregated result of a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Per-URL outcomes, in processing order
    pub outcomes: Vec<(String, UrlOutcome)>,
    /// True when the run stopped early because shutdown was requested
    pub interrupted: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Number of URLs skipped because they were already recorded
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UrlOutcome::Skipped))
    }

    /// Number of URLs downloaded and recorded
    pub fn recorded(&self) -> usize {
        self.count(|o| matches!(o, UrlOutcome::Recorded { .. }))
    }

    /// Number of URLs that failed
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UrlOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&UrlOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Events emitted while a batch runs
///
/// Consumers subscribe through [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
/// Delivery is best-effort: slow receivers may miss progress events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// URL already recorded in the ledger
    Skipped {
        /// Candidate URL
        url: String,
    },

    /// URL accepted by the job service
    Submitted {
        /// Candidate URL
        url: String,
        /// Job created for it
        job_id: JobId,
    },

    /// A status poll returned
    JobStatus {
        /// Job being polled
        job_id: JobId,
        /// Status string reported by the service
        status: String,
    },

    /// Download progress for one file
    Downloading {
        /// Remote file URL
        url: String,
        /// Local file name
        file_name: String,
        /// Bytes written so far
        bytes: u64,
        /// Total size from Content-Length, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// One file fully written
    FileSaved {
        /// Remote file URL
        url: String,
        /// Final on-disk path
        path: PathBuf,
        /// Size in bytes
        bytes: u64,
    },

    /// URL fully processed and appended to the ledger
    Recorded {
        /// Candidate URL
        url: String,
        /// Number of files downloaded
        files: usize,
    },

    /// URL processing failed
    Failed {
        /// Candidate URL
        url: String,
        /// Stage that failed
        stage: Stage,
        /// Error message
        error: String,
    },

    /// Batch finished
    RunFinished {
        /// URLs skipped
        skipped: usize,
        /// URLs recorded
        recorded: usize,
        /// URLs failed
        failed: usize,
        /// Whether shutdown cut the run short
        interrupted: bool,
    },
}

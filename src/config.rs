//! Configuration types for mediahook-dl
//!
//! Configuration can be loaded from a JSON file ([`Config::from_json_file`]) or from
//! `MEDIAHOOK_*` environment variables ([`Config::from_env`]). Every field except the
//! service base URL has a default.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

/// Environment variable holding the job service base URL
pub const ENV_BASE_URL: &str = "MEDIAHOOK_BASE_URL";
/// Environment variable holding the `Authorization` header value
pub const ENV_AUTH_HEADER: &str = "MEDIAHOOK_AUTH_HEADER";
/// Environment variable toggling the `iphone` rendering hint
pub const ENV_IPHONE: &str = "MEDIAHOOK_IPHONE";
/// Environment variable holding the download directory
pub const ENV_DOWNLOAD_DIR: &str = "MEDIAHOOK_DOWNLOAD_DIR";
/// Environment variable holding the ledger file path
pub const ENV_LEDGER_PATH: &str = "MEDIAHOOK_LEDGER_PATH";
/// Environment variable holding the candidate URL file path
pub const ENV_URL_FILE: &str = "MEDIAHOOK_URL_FILE";
/// Environment variable holding the poll interval in seconds
pub const ENV_POLL_INTERVAL_SECS: &str = "MEDIAHOOK_POLL_INTERVAL_SECS";
/// Environment variable holding the per-URL deadline in seconds (0 disables)
pub const ENV_JOB_DEADLINE_SECS: &str = "MEDIAHOOK_JOB_DEADLINE_SECS";
/// Environment variable holding the HTTP request timeout in seconds
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "MEDIAHOOK_REQUEST_TIMEOUT_SECS";
/// Environment variable holding the download chunk size in bytes
pub const ENV_CHUNK_SIZE: &str = "MEDIAHOOK_CHUNK_SIZE";

/// Processing service connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the service, e.g. `https://media.example.com`
    pub base_url: String,

    /// Extra headers sent with every service request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Ask the service to render media for iPhone playback (default: false)
    #[serde(default)]
    pub iphone: bool,

    /// Timeout for a single submit or status request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: BTreeMap::new(),
            iphone: false,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Download behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory result files are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum number of bytes handled per write (default: 8192)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Connect timeout and idle timeout per read (default: 30 seconds)
    ///
    /// A transfer that keeps receiving data may take longer than this in total.
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size: default_chunk_size(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Job polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between status polls (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Upper bound on processing a single URL (default: 30 minutes, None = unbounded)
    ///
    /// A job that is still `working` when the deadline passes fails the URL; it is not
    /// recorded and will be retried on the next run.
    #[serde(
        default = "default_job_deadline",
        with = "optional_duration_serde"
    )]
    pub job_deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            job_deadline: default_job_deadline(),
        }
    }
}

/// Retry configuration for transient status-poll failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Processing service connection
    pub service: ServiceConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Job polling behavior
    #[serde(default)]
    pub poll: PollConfig,

    /// Retry policy for status polls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Ledger of processed URLs (default: "./already_scraped.txt")
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Optional file of candidate URLs used by the bundled binary
    #[serde(default)]
    pub url_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            download: DownloadConfig::default(),
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
            ledger_path: default_ledger_path(),
            url_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MEDIAHOOK_*` environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// `lookup` returns the raw value for an environment key, or `None` when unset.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get(ENV_BASE_URL).ok_or_else(|| Error::Config {
            message: format!("{ENV_BASE_URL} is not set"),
            key: Some(ENV_BASE_URL.to_string()),
        })?;

        let mut config = Config {
            service: ServiceConfig {
                base_url,
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(auth) = get(ENV_AUTH_HEADER) {
            config
                .service
                .headers
                .insert("Authorization".to_string(), auth);
        }
        if let Some(raw) = get(ENV_IPHONE) {
            config.service.iphone = parse_bool(ENV_IPHONE, &raw)?;
        }
        if let Some(dir) = get(ENV_DOWNLOAD_DIR) {
            config.download.download_dir = PathBuf::from(dir);
        }
        if let Some(path) = get(ENV_LEDGER_PATH) {
            config.ledger_path = PathBuf::from(path);
        }
        config.url_file = get(ENV_URL_FILE).map(PathBuf::from);
        if let Some(raw) = get(ENV_POLL_INTERVAL_SECS) {
            config.poll.interval = Duration::from_secs(parse_number(ENV_POLL_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = get(ENV_JOB_DEADLINE_SECS) {
            let secs = parse_number(ENV_JOB_DEADLINE_SECS, &raw)?;
            config.poll.job_deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT_SECS) {
            let timeout = Duration::from_secs(parse_number(ENV_REQUEST_TIMEOUT_SECS, &raw)?);
            config.service.request_timeout = timeout;
            config.download.request_timeout = timeout;
        }
        if let Some(raw) = get(ENV_CHUNK_SIZE) {
            config.download.chunk_size = parse_number::<usize>(ENV_CHUNK_SIZE, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.service.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL {:?}: {e}", self.service.base_url),
            key: Some("service.base_url".to_string()),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config {
                message: format!("base URL must be http or https, got {}", base.scheme()),
                key: Some("service.base_url".to_string()),
            });
        }
        if self.download.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk size must be greater than zero".to_string(),
                key: Some("download.chunk_size".to_string()),
            });
        }
        if self.download.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "download timeout must be greater than zero".to_string(),
                key: Some("download.request_timeout".to_string()),
            });
        }
        if self.poll.interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".to_string(),
                key: Some("poll.interval".to_string()),
            });
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config {
            message: format!("{key} must be a boolean, got {other:?}"),
            key: Some(key.to_string()),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::Config {
        message: format!("{key} must be a non-negative integer, got {raw:?}"),
        key: Some(key.to_string()),
    })
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("./already_scraped.txt")
}

fn default_chunk_size() -> usize {
    8192
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_job_deadline() -> Option<Duration> {
    Some(Duration::from_secs(30 * 60))
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // 0 disables the bound
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|&s| s > 0).map(Duration::from_secs))
    }
}

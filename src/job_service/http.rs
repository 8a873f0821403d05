//! HTTP implementation of [`JobService`].

use super::{JobService, SubmitOptions};
use crate::config::{RetryConfig, ServiceConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{FileDescriptor, Job, JobId, JobStatus};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

const SUBMIT_SEGMENTS: [&str; 2] = ["hooks", "media"];
const STATUS_SEGMENTS: [&str; 3] = ["api", "v1", "job_status"];

#[derive(Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    iphone: bool,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    job_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payload: Option<Vec<FileDescriptor>>,
}

/// Job service client speaking the `/hooks/media` + `/api/v1/job_status` protocol
#[derive(Clone, Debug)]
pub struct HttpJobService {
    client: reqwest::Client,
    base_url: url::Url,
    retry: RetryConfig,
}

impl HttpJobService {
    /// Build a client from service settings
    ///
    /// Configured headers are attached to every request. Status polls are retried on
    /// transient failures according to `retry`.
    pub fn new(config: &ServiceConfig, retry: RetryConfig) -> Result<Self> {
        let base_url = url::Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL {:?}: {e}", config.base_url),
            key: Some("service.base_url".to_string()),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Config {
                message: format!("invalid header name {name:?}: {e}"),
                key: Some("service.headers".to_string()),
            })?;
            let mut header_value = HeaderValue::from_str(value).map_err(|e| Error::Config {
                message: format!("invalid value for header {name:?}: {e}"),
                key: Some("service.headers".to_string()),
            })?;
            header_value.set_sensitive(true);
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
                key: None,
            })?;

        Ok(Self {
            client,
            base_url,
            retry,
        })
    }

    /// Base URL joined with `segments`, each percent-encoded as a path segment
    fn endpoint(&self, segments: &[&str]) -> Result<url::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config {
                message: format!("base URL {} cannot carry a path", self.base_url),
                key: Some("service.base_url".to_string()),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<Job> {
        let mut segments = STATUS_SEGMENTS.to_vec();
        segments.push(job_id.as_str());
        let url = self.endpoint(&segments)?;
        let endpoint = url.path().to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::service_transport(&endpoint, &e))?;

        if !response.status().is_success() {
            return Err(Error::service_status(&endpoint, response.status()));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| Error::service_malformed(&endpoint, format!("invalid status body: {e}")))?;

        let status = body
            .status
            .ok_or_else(|| Error::service_malformed(&endpoint, "response has no status field"))?;

        Ok(Job {
            id: job_id.clone(),
            status: JobStatus::parse(&status),
            payload: body.payload,
        })
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit(&self, url: &str, options: SubmitOptions) -> Result<JobId> {
        let target = self.endpoint(&SUBMIT_SEGMENTS)?;
        let endpoint = target.path().to_string();

        let response = self
            .client
            .post(target)
            .json(&SubmitRequest {
                url,
                iphone: options.iphone,
            })
            .send()
            .await
            .map_err(|e| Error::service_transport(&endpoint, &e))?;

        if !response.status().is_success() {
            return Err(Error::service_status(&endpoint, response.status()));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::service_malformed(&endpoint, format!("invalid submit body: {e}")))?;

        let job_id = match body.job_id {
            Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => return Err(Error::MissingJobId),
        };

        tracing::debug!(url = %url, job_id = %job_id, "job submitted");
        Ok(JobId(job_id))
    }

    async fn poll_status(&self, job_id: &JobId) -> Result<Job> {
        let request = format!("status of job {job_id}");
        with_retry(&self.retry, &request, || self.fetch_status(job_id)).await
    }
}

//! Shared fixtures for pipeline integration tests
//!
//! A single wiremock server plays both the job service and the CDN the payload files
//! are fetched from.

#![allow(dead_code)]

use mediahook_dl::{Config, Event};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock service plus a scratch directory for downloads and the ledger
pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Config pointed at the mock server with millisecond-scale timings
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.service.base_url = self.server.uri();
        config
            .service
            .headers
            .insert("Authorization".to_string(), "Bearer test".to_string());
        config.download.download_dir = self.download_dir();
        config.ledger_path = self.ledger_path();
        config.poll.interval = Duration::from_millis(10);
        config.poll.job_deadline = Some(Duration::from_secs(10));
        config.retry.initial_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(50);
        config.retry.jitter = false;
        config
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("already_scraped.txt")
    }

    pub fn seed_ledger(&self, urls: &[&str]) {
        let mut contents = urls.join("\n");
        contents.push('\n');
        std::fs::write(self.ledger_path(), contents).unwrap();
    }

    pub fn ledger_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.ledger_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Names of everything in the download directory, sorted
    pub fn downloaded(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.download_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// URL of a file served by the mock CDN
    pub fn cdn(&self, file: &str) -> String {
        format!("{}/cdn/{file}", self.server.uri())
    }

    /// Answer a submission of `url` with `response`
    pub async fn mock_submit(&self, url: &str, response: Value) {
        Mock::given(method("POST"))
            .and(path("/hooks/media"))
            .and(body_partial_json(json!({ "url": url })))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&self.server)
            .await;
    }

    /// Answer status polls for `job_id` with `statuses` in order; the last one repeats
    /// and carries `payload`
    pub async fn mock_statuses(&self, job_id: &str, statuses: &[&str], payload: Value) {
        let route = format!("/api/v1/job_status/{job_id}");
        let (last, leading) = statuses.split_last().unwrap();
        for status in leading {
            Mock::given(method("GET"))
                .and(path(route.as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": status })))
                .up_to_n_times(1)
                .mount(&self.server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": last, "payload": payload })),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve `body` at [`TestEnv::cdn`]`(file)`
    pub async fn mock_file(&self, file: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/cdn/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Requests the mock server has seen to paths starting with `prefix`
    pub async fn requests_to(&self, prefix: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with(prefix))
            .count()
    }
}

/// Drain every event already buffered in `rx`
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

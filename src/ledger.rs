//! Append-only ledger of fully processed source URLs
//!
//! The backing store is a plain text file with one URL per line. It is read once
//! when the ledger is loaded and only ever appended to afterwards, so a URL that
//! made it into the file is treated as processed by every later run.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Set of processed URLs backed by an append-only file
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl Ledger {
    /// Load the ledger from `path`
    ///
    /// A missing file yields an empty ledger. Any other read failure is returned.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?path, "no ledger file yet, starting empty");
                HashSet::new()
            }
            Err(e) => return Err(Error::Io(e)),
        };

        tracing::info!(path = ?path, entries = seen.len(), "loaded ledger");
        Ok(Self { path, seen })
    }

    /// Whether `url` was recorded by this or an earlier run
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url.trim())
    }

    /// Durably record `url`
    ///
    /// The line is flushed and synced before returning. Recording a URL twice is
    /// harmless since the file is read back as a set.
    pub async fn append(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() || url.contains(['\n', '\r']) {
            return Err(self.write_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to record malformed URL {url:?}"),
            )));
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        let line = format!("{url}\n");
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.write_error(e))?;
        file.flush().await.map_err(|e| self.write_error(e))?;
        file.sync_data().await.map_err(|e| self.write_error(e))?;

        self.seen.insert(url.to_string());
        tracing::debug!(url = %url, path = ?self.path, "recorded URL in ledger");
        Ok(())
    }

    /// Number of distinct recorded URLs
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: std::io::Error) -> Error {
        Error::LedgerWrite {
            path: self.path.clone(),
            source,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load(dir.path().join("nope.txt")).await.unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("https://x/1"));
    }

    #[tokio::test]
    async fn appended_urls_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.txt");

        let mut ledger = Ledger::load(&path).await.unwrap();
        ledger.append("https://x/1").await.unwrap();
        ledger.append("https://x/2").await.unwrap();
        assert!(ledger.contains("https://x/1"));
        drop(ledger);

        let reloaded = Ledger::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("https://x/1"));
        assert!(reloaded.contains("https://x/2"));
        assert!(!reloaded.contains("https://x/3"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "https://x/1\nhttps://x/2\n");
    }

    #[tokio::test]
    async fn duplicate_append_is_harmless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.txt");

        let mut ledger = Ledger::load(&path).await.unwrap();
        ledger.append("https://x/1").await.unwrap();
        ledger.append("https://x/1").await.unwrap();
        assert_eq!(ledger.len(), 1);

        let reloaded = Ledger::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("https://x/1"));
    }

    #[tokio::test]
    async fn load_ignores_blank_lines_and_crlf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.txt");
        std::fs::write(&path, "https://x/1\r\n\n  \nhttps://x/2").unwrap();

        let ledger = Ledger::load(&path).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("https://x/1"));
        assert!(ledger.contains("https://x/2"));
    }

    #[tokio::test]
    async fn append_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("nested").join("ledger.txt");

        let mut ledger = Ledger::load(&path).await.unwrap();
        ledger.append("https://x/1").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn append_rejects_embedded_newline() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path().join("ledger.txt")).await.unwrap();

        let err = ledger.append("https://x/1\nhttps://x/2").await.unwrap_err();
        assert!(matches!(err, Error::LedgerWrite { .. }));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_a_ledger_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending
        let mut ledger = Ledger::load(dir.path().join("missing.txt")).await.unwrap();
        ledger.path = dir.path().to_path_buf();

        let err = ledger.append("https://x/1").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::LedgerWrite { .. }));
        assert!(!ledger.contains("https://x/1"));
    }

    #[tokio::test]
    async fn unreadable_store_is_an_error() {
        let dir = tempdir().unwrap();
        // Reading a directory as a file fails with something other than NotFound
        let err = Ledger::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

//! Upstream sources of candidate URLs
//!
//! A [`UrlSource`] stands in for the messaging inbox: it authenticates, yields an
//! ordered list of shared media links, and signs out again. The orchestrator treats a
//! failed login as fatal and a failed extraction as "no URLs this run".

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Producer of candidate URLs for a batch run
#[async_trait]
pub trait UrlSource: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Authenticate with the upstream service
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] when credentials are rejected; the run aborts.
    async fn login(&self) -> Result<()> {
        Ok(())
    }

    /// Candidate URLs in the order they should be processed
    async fn candidate_urls(&self) -> Result<Vec<String>>;

    /// Release the upstream session
    async fn logout(&self) -> Result<()> {
        Ok(())
    }
}

/// Fixed list of URLs
#[derive(Clone, Debug, Default)]
pub struct StaticUrlSource {
    urls: Vec<String>,
}

impl StaticUrlSource {
    /// Create a source yielding `urls` as given
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UrlSource for StaticUrlSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn candidate_urls(&self) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// Newline-delimited file of URLs
///
/// Blank lines and lines starting with `#` are ignored. The file is read on every call
/// so it can be refreshed between runs.
#[derive(Clone, Debug)]
pub struct FileUrlSource {
    path: PathBuf,
}

impl FileUrlSource {
    /// Create a source reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UrlSource for FileUrlSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn candidate_urls(&self) -> Result<Vec<String>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::SourceExtraction(format!("cannot read {}: {e}", self.path.display()))
        })?;

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn static_source_preserves_order() {
        let source = StaticUrlSource::new(["https://x/2", "https://x/1"]);
        source.login().await.unwrap();
        assert_eq!(
            source.candidate_urls().await.unwrap(),
            vec!["https://x/2", "https://x/1"]
        );
        source.logout().await.unwrap();
    }

    #[tokio::test]
    async fn file_source_skips_comments_and_blanks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "# shared this week\nhttps://x/1\n\n   https://x/2  \r\n#https://x/3\n",
        )
        .unwrap();

        let urls = FileUrlSource::new(&path).candidate_urls().await.unwrap();
        assert_eq!(urls, vec!["https://x/1", "https://x/2"]);
    }

    #[tokio::test]
    async fn file_source_missing_file_is_extraction_error() {
        let dir = tempdir().unwrap();
        let err = FileUrlSource::new(dir.path().join("none.txt"))
            .candidate_urls()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceExtraction(_)));
        assert!(!err.is_fatal());
    }
}

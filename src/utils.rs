//! Utility functions for cancellation and file name handling

use crate::error::{Error, Result};
use std::future::Future;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Longest extension (without the dot) carried over to a generated file name
const MAX_EXTENSION_LEN: usize = 16;

/// Run `fut` unless `cancel` fires first
///
/// Returns [`Error::Cancelled`] if the token is (or becomes) cancelled before the
/// future completes. The future is dropped in that case.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Last path segment of a URL, ignoring query string and fragment
///
/// # Examples
///
/// ```
/// use mediahook_dl::utils::file_name_from_url;
///
/// assert_eq!(file_name_from_url("https://cdn.example/v/clip.mp4?sig=abc"), Some("clip.mp4".to_string()));
/// assert_eq!(file_name_from_url("https://cdn.example/"), None);
/// ```
#[must_use]
pub fn file_name_from_url(location: &str) -> Option<String> {
    let segment = match url::Url::parse(location) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        // Not an absolute URL; treat it as a bare path
        Err(_) => location
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(str::to_string),
    };
    segment.filter(|s| !s.is_empty())
}

/// Extension of `file_name` including the leading dot, or an empty string
///
/// Only short alphanumeric extensions are kept so a hostile name cannot inject path
/// separators or control characters into the generated file name.
///
/// # Examples
///
/// ```
/// use mediahook_dl::utils::extension_of;
///
/// assert_eq!(extension_of("movie.MP4"), ".MP4");
/// assert_eq!(extension_of("archive.tar.gz"), ".gz");
/// assert_eq!(extension_of("README"), "");
/// assert_eq!(extension_of(".hidden"), "");
/// ```
#[must_use]
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

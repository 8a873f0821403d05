//! Unique file naming for downloaded results.

use crate::error::Result;
use crate::types::FileDescriptor;
use crate::utils::{extension_of, file_name_from_url};
use std::path::{Path, PathBuf};

/// Maximum number of fresh tokens drawn when a generated name is already taken
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Source of unique tokens used as file stems
///
/// Injected into the download engine so tests can supply deterministic names.
pub trait IdGenerator: Send + Sync {
    /// Return a fresh token; must be a valid file name component
    fn next_id(&self) -> String;
}

/// Random v4 UUID tokens
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Extension to carry over for `descriptor`, taken from its display name when present
/// and from the last segment of its URL otherwise
pub(crate) fn descriptor_extension(descriptor: &FileDescriptor) -> String {
    let original = descriptor
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| file_name_from_url(&descriptor.path))
        .unwrap_or_default();
    extension_of(&original)
}

/// Pick `{token}{extension}` inside `dir` that collides with neither a finished file
/// nor an in-progress `.part` file
pub(crate) async fn unique_destination(
    ids: &dyn IdGenerator,
    dir: &Path,
    extension: &str,
) -> Result<PathBuf> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(format!("{}{extension}", ids.next_id()));
        let taken = tokio::fs::try_exists(&candidate).await?
            || tokio::fs::try_exists(part_path(&candidate)).await?;
        if !taken {
            return Ok(candidate);
        }
        tracing::debug!(path = ?candidate, "generated name already exists, drawing another");
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "could not find an unused file name in {} after {MAX_NAME_ATTEMPTS} attempts",
            dir.display()
        ),
    )
    .into())
}

/// Temporary path a file is streamed to before being renamed into place
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

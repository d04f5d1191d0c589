use std::path::Path;

use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE_KB, MAX_CHUNK_SIZE_KB, MIN_CHUNK_SIZE_KB};
use url::Url;

use crate::chunked::{ChunkSource, SourceOpener};

/// Reasons an upload is refused before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the endpoint must be a non-empty http(s) URL: {0:?}")]
    InvalidEndpoint(String),

    #[error("the file must be a readable, non-empty regular file: {0}")]
    InvalidFile(String),

    #[error("the chunk size must be 5120 KB or more (got {0} KB)")]
    ChunkSizeTooSmall(u64),

    #[error("the chunk size must not exceed 512000 KB (got {0} KB)")]
    ChunkSizeTooLarge(u64),

    #[error("the file size of {actual_kb} KB exceeds the permitted {max_kb} KB")]
    FileSizeExceeded { actual_kb: u64, max_kb: u64 },
}

/// An upload request that passed every pre-start check.
pub struct ValidatedUpload {
    /// Open source for the file; owned by the session from here on.
    pub source: Box<dyn ChunkSource>,
    pub file_size: u64,
    /// Chunk size in bytes.
    pub chunk_size: u64,
}

impl std::fmt::Debug for ValidatedUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedUpload")
            .field("file_size", &self.file_size)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

/// Checks an upload request before any network call.
///
/// Rejects, in order:
/// - empty or non-http(s) endpoints
/// - files that cannot be opened, are not regular files, or are empty
/// - chunk sizes outside `[MIN_CHUNK_SIZE_KB, MAX_CHUNK_SIZE_KB]`
///   (`None` selects [`DEFAULT_CHUNK_SIZE_KB`])
/// - files larger than `max_file_size_kb` (`None` or `0` means unlimited)
pub fn validate_upload(
    endpoint: &str,
    file: &Path,
    chunk_size_kb: Option<u64>,
    max_file_size_kb: Option<u64>,
    opener: &dyn SourceOpener,
) -> Result<ValidatedUpload, ValidationError> {
    validate_endpoint(endpoint)?;

    let source = opener
        .open(file)
        .map_err(|e| ValidationError::InvalidFile(format!("{}: {e}", file.display())))?;
    let file_size = source.size();
    if file_size == 0 {
        return Err(ValidationError::InvalidFile(format!(
            "{}: file is empty",
            file.display()
        )));
    }

    let chunk_kb = chunk_size_kb.unwrap_or(DEFAULT_CHUNK_SIZE_KB);
    if chunk_kb < MIN_CHUNK_SIZE_KB {
        return Err(ValidationError::ChunkSizeTooSmall(chunk_kb));
    }
    if chunk_kb > MAX_CHUNK_SIZE_KB {
        return Err(ValidationError::ChunkSizeTooLarge(chunk_kb));
    }

    if let Some(max_kb) = max_file_size_kb.filter(|kb| *kb > 0)
        && file_size > max_kb.saturating_mul(1024)
    {
        return Err(ValidationError::FileSizeExceeded {
            actual_kb: file_size / 1024,
            max_kb,
        });
    }

    Ok(ValidatedUpload {
        source,
        file_size,
        chunk_size: chunk_kb * 1024,
    })
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidEndpoint(endpoint.to_string());

    let url = Url::parse(endpoint.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

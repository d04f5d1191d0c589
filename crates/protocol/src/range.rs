//! Byte ranges: rendering `Content-Range` and parsing `Range` acknowledgements.

use serde::{Deserialize, Serialize};

/// Errors raised while interpreting acknowledgement headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("resume-incomplete response without a Range header")]
    MissingRange,

    #[error("malformed Range header: {0:?}")]
    MalformedRange(String),

    #[error("acknowledged byte {acknowledged} is past the chunk end {chunk_last}")]
    AcknowledgedPastChunk { acknowledged: u64, chunk_last: u64 },
}

/// A half-open byte range `[start, end)` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Offset of the last byte (inclusive), as used on the wire.
    ///
    /// Empty ranges report their start.
    pub fn last_byte(&self) -> u64 {
        self.end.saturating_sub(1).max(self.start)
    }

    /// Renders the `Content-Range` value: `bytes {start}-{last}/{total}`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.last_byte(), total)
    }
}

/// Parses a `Range` acknowledgement of the form `bytes=0-{uploadedEnd}`.
///
/// Returns the inclusive offset of the last byte the server has absorbed.
/// The `bytes=` prefix is optional; surrounding whitespace is ignored.
pub fn parse_acknowledged_end(value: &str) -> Result<u64, ProtocolError> {
    let trimmed = value.trim();
    let bounds = trimmed.strip_prefix("bytes=").unwrap_or(trimmed);

    let (start, end) = bounds
        .split_once('-')
        .ok_or_else(|| ProtocolError::MalformedRange(value.to_string()))?;

    let start: u64 = start
        .trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedRange(value.to_string()))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedRange(value.to_string()))?;

    if end < start {
        return Err(ProtocolError::MalformedRange(value.to_string()));
    }
    Ok(end)
}

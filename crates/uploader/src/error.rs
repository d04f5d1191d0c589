//! Error types for the upload engine.

use chunkup_protocol::ProtocolError;
use chunkup_transfer::ValidationError;

/// Failures of a single transport request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failures reported while a chunk is in flight, and fatal session failures.
///
/// Carried by [`UploadEvent`](crate::UploadEvent)s, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to read chunk: {0}")]
    ChunkRead(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),

    #[error("server busy (status {status}), {consecutive} consecutive backoffs")]
    ServerBusy { status: u16, consecutive: u32 },

    #[error("chunk {chunk} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        chunk: u64,
        attempts: u32,
        last: Box<UploadError>,
    },
}

/// Errors returned by [`UploadSession`](crate::UploadSession) calls.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("upload session is closed")]
    Closed,
}

/// Errors loading or saving [`UploaderConfig`](crate::UploaderConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

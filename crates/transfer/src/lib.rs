//! Chunk sources, chunk arithmetic, pre-start validation and progress
//! accounting for resumable uploads.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkSource, FileChunkSource, FileOpener, SourceOpener};
pub use progress::overall_progress;
pub use types::ChunkPlan;
pub use validation::{ValidatedUpload, ValidationError, validate_upload};

/// Errors produced by chunk sources.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("read at offset {offset} is past end of file ({size} bytes)")]
    OutOfRange { offset: u64, size: u64 },
}

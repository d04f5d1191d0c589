//! Public types for the upload session.

use chunkup_protocol::ByteRange;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::UploadError;

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// No upload started, or reset after `retry_upload`.
    Idle,
    /// Chunks are being transferred (or a retry is scheduled).
    Active,
    /// Paused by the caller.
    Paused,
    /// Waiting for connectivity.
    Offline,
    /// Aborted by the caller.
    Aborted,
    /// Every chunk was acknowledged.
    Completed,
    /// A chunk ran out of retries.
    Failed,
}

impl UploadState {
    /// `true` for states no further transfer can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Completed | Self::Failed)
    }
}

/// Per-upload options supplied to `start`.
///
/// `None` fields fall back to the session's configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Chunk size in KiB.
    #[serde(default)]
    pub chunk_size_kb: Option<u64>,
    /// Retries allowed for a single chunk.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Largest file accepted, in KiB (`0` = unlimited).
    #[serde(default)]
    pub max_file_size_kb: Option<u64>,
}

/// Something that happened during an upload.
///
/// Delivered at most once, in order, to every subscriber. Chunk numbers
/// are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    /// A new upload passed validation.
    Started {
        upload_id: Uuid,
        file_size: u64,
        total_chunks: u64,
    },
    /// A chunk request is about to be sent.
    ChunkAttempt { chunk: u64, total_chunks: u64 },
    /// The server acknowledged a whole chunk.
    ChunkSuccess { chunk: u64, total_chunks: u64 },
    /// A chunk request failed; `attempt` is 1 for the first try.
    ChunkAttemptFailure {
        chunk: u64,
        total_chunks: u64,
        attempt: u32,
        #[serde(serialize_with = "as_display")]
        error: UploadError,
    },
    /// Overall progress in `[0.0, 1.0]`.
    Progress { progress: f64 },
    /// The whole file was uploaded.
    Success,
    /// The upload failed for good.
    Failure {
        #[serde(serialize_with = "as_display")]
        error: UploadError,
    },
    /// A non-fatal problem the caller should know about.
    Warning {
        #[serde(serialize_with = "as_display")]
        error: UploadError,
    },
    Paused,
    Resumed,
    Online,
    Offline,
    /// The caller aborted the upload.
    Aborted,
}

impl UploadEvent {
    /// `true` for the event that ends an upload.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure { .. } | Self::Aborted)
    }
}

fn as_display<S: Serializer>(error: &UploadError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Point-in-time copy of a session's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Identifier of the current upload; `None` before start and after a reset.
    pub upload_id: Option<Uuid>,
    pub state: UploadState,
    pub file_size: u64,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Acknowledged chunks; equals `total_chunks` once complete.
    pub chunk_index: u64,
    pub chunk_range: ByteRange,
    pub chunk_retry_count: u32,
    pub max_chunk_retries: u32,
    pub consecutive_server_backoffs: u32,
    /// The server-busy ceiling was reached; waiting for pause/resume.
    pub stalled: bool,
    pub transfer_in_flight: bool,
    pub reachable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn terminal_states() {
        assert!(UploadState::Completed.is_terminal());
        assert!(UploadState::Failed.is_terminal());
        assert!(UploadState::Aborted.is_terminal());
        assert!(!UploadState::Idle.is_terminal());
        assert!(!UploadState::Offline.is_terminal());
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(UploadEvent::ChunkAttempt {
            chunk: 1,
            total_chunks: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "chunk_attempt");
        assert_eq!(json["chunk"], 1);

        let json = serde_json::to_value(UploadEvent::Paused).unwrap();
        assert_eq!(json["event"], "paused");
    }

    #[test]
    fn event_errors_serialize_as_text() {
        let json = serde_json::to_value(UploadEvent::Failure {
            error: UploadError::Transport(TransportError::Timeout),
        })
        .unwrap();
        assert_eq!(json["event"], "failure");
        assert_eq!(json["error"], "transport error: request timed out");
    }

    #[test]
    fn options_default_to_none() {
        let opts: UploadOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, UploadOptions::default());
    }
}

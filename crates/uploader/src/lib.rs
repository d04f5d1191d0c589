//! Resumable chunked upload engine.
//!
//! An [`UploadSession`] uploads one file to an endpoint in fixed-size
//! chunks. Each chunk is a single `PUT` carrying a `Content-Range`
//! header; the server acknowledges with a success status or a `308`
//! whose `Range` header says how much it kept.
//!
//! # Architecture
//!
//! - **Session actor**: one tokio task owns all upload state. Public
//!   calls, transfer completions, retry timers and reachability changes
//!   are all messages to it, so transitions never interleave.
//! - **Transport**: [`Transport`] performs one request; [`HttpTransport`]
//!   is the `reqwest` implementation.
//! - **Network**: a [`NetworkObserver`] feeds reachability into the
//!   session; the host calls [`UploadSession::on_foreground`] to
//!   re-subscribe after returning to the foreground.
//! - **Events**: [`UploadEvent`]s are broadcast to every subscriber in
//!   the order they happen.

pub mod backoff;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use backoff::BackoffPolicy;
pub use config::UploaderConfig;
pub use error::{ConfigError, SessionError, TransportError, UploadError};
pub use network::{NetworkObserver, ReachabilityProbe, WatchNetworkObserver};
pub use session::{ProgressHandler, UploadSession, UploadSessionBuilder};
pub use transport::{ChunkRequest, HttpTransport, Transport, TransportResponse, UploadProgressFn};
pub use types::{SessionSnapshot, UploadEvent, UploadOptions, UploadState};

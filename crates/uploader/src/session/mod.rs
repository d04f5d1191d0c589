//! Upload session handle and builder.
//!
//! [`UploadSession`] is a cheap, cloneable handle. All state lives in a
//! single actor task (see `actor.rs`); every public call is a message to it.

mod actor;


use std::path::Path;
use std::sync::Arc;

use chunkup_protocol::detect_content_type;
use chunkup_transfer::{FileOpener, SourceOpener, ValidatedUpload, validate_upload};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::config::UploaderConfig;
use crate::error::SessionError;
use crate::network::NetworkObserver;
use crate::transport::Transport;
use crate::types::{SessionSnapshot, UploadEvent, UploadOptions};

use actor::SessionActor;
#[cfg(test)]
use actor::Internal;

/// Direct progress callback, invoked with the overall fraction in `[0, 1]`.
pub type ProgressHandler = Box<dyn Fn(f64) + Send + Sync>;

/// Messages from handles to the actor.
pub(crate) enum Command {
    Start {
        upload: ValidatedUpload,
        endpoint: String,
        content_type: &'static str,
        max_retries: u32,
        reply: oneshot::Sender<()>,
    },
    Pause,
    Resume,
    Abort,
    Reset,
    NetworkChange(bool),
    Foreground,
    AttachNetwork(Arc<dyn NetworkObserver>),
    SetProgressHandler(Option<ProgressHandler>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Handle to a resumable chunked upload session.
///
/// One session uploads one file at a time. Starting a new upload replaces
/// the current one. Dropping every handle stops the session.
#[derive(Clone)]
pub struct UploadSession {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<UploadEvent>,
    opener: Arc<dyn SourceOpener>,
    default_chunk_size_kb: u64,
    default_max_retries: u32,
    #[cfg(test)]
    internal: mpsc::UnboundedSender<Internal>,
}

impl UploadSession {
    /// Creates a session with default settings.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> UploadSessionBuilder {
        UploadSessionBuilder::new(transport)
    }

    /// Validates and starts uploading `file` to `endpoint`.
    ///
    /// Validation failures are returned here and leave the session
    /// untouched. On success the `Started` event has been emitted by the
    /// time this returns.
    pub async fn start(
        &self,
        file: impl AsRef<Path>,
        endpoint: &str,
        options: UploadOptions,
    ) -> Result<(), SessionError> {
        let file = file.as_ref();
        let chunk_size_kb = options.chunk_size_kb.unwrap_or(self.default_chunk_size_kb);
        let upload = validate_upload(
            endpoint,
            file,
            Some(chunk_size_kb),
            options.max_file_size_kb,
            self.opener.as_ref(),
        )?;
        debug!(
            file = %file.display(),
            file_size = upload.file_size,
            chunk_size = upload.chunk_size,
            "upload validated"
        );

        let (reply, done) = oneshot::channel();
        self.send(Command::Start {
            upload,
            endpoint: endpoint.trim().to_string(),
            content_type: detect_content_type(file),
            max_retries: options.max_retries.unwrap_or(self.default_max_retries),
            reply,
        })?;
        done.await.map_err(|_| SessionError::Closed)
    }

    /// Pauses an active upload. No-op in other states.
    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause)
    }

    /// Resumes a paused upload from the current chunk.
    pub fn resume(&self) -> Result<(), SessionError> {
        self.send(Command::Resume)
    }

    /// Cancels the upload. No-op when idle or already finished.
    pub fn abort(&self) -> Result<(), SessionError> {
        self.send(Command::Abort)
    }

    /// Returns the session to idle, discarding any upload. Emits no event.
    pub fn retry_upload(&self) -> Result<(), SessionError> {
        self.send(Command::Reset)
    }

    /// Reports a reachability change directly.
    pub fn on_network_change(&self, reachable: bool) -> Result<(), SessionError> {
        self.send(Command::NetworkChange(reachable))
    }

    /// Host foreground hook: re-subscribes to the attached network observer.
    pub fn on_foreground(&self) -> Result<(), SessionError> {
        self.send(Command::Foreground)
    }

    /// Feeds reachability from `observer`, replacing any previous one.
    pub fn attach_network(&self, observer: Arc<dyn NetworkObserver>) -> Result<(), SessionError> {
        self.send(Command::AttachNetwork(observer))
    }

    pub fn set_progress_handler(&self, handler: Option<ProgressHandler>) -> Result<(), SessionError> {
        self.send(Command::SetProgressHandler(handler))
    }

    /// Subscribes to events emitted from now on.
    ///
    /// Each receiver buffers up to the builder's `event_capacity` events. A
    /// receiver that falls further behind loses the oldest ones and its next
    /// `recv` returns [`broadcast::error::RecvError::Lagged`] with the count.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Returns a copy of the session state once all earlier calls are processed.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, message: Internal) {
        let _ = self.internal.send(message);
    }
}

/// Builder for [`UploadSession`].
pub struct UploadSessionBuilder {
    transport: Arc<dyn Transport>,
    opener: Arc<dyn SourceOpener>,
    backoff: BackoffPolicy,
    max_server_backoffs: u32,
    event_capacity: usize,
    chunk_size_kb: u64,
    max_retries: u32,
    network: Option<Arc<dyn NetworkObserver>>,
}

impl UploadSessionBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        let config = UploaderConfig::default();
        Self {
            transport,
            opener: Arc::new(FileOpener),
            backoff: config.backoff_policy(),
            max_server_backoffs: config.max_server_backoffs,
            event_capacity: config.event_capacity,
            chunk_size_kb: config.chunk_size_kb,
            max_retries: config.max_chunk_retries,
            network: None,
        }
    }

    /// Applies every setting from `config`.
    pub fn config(mut self, config: &UploaderConfig) -> Self {
        self.backoff = config.backoff_policy();
        self.max_server_backoffs = config.max_server_backoffs;
        self.event_capacity = config.event_capacity;
        self.chunk_size_kb = config.chunk_size_kb;
        self.max_retries = config.max_chunk_retries;
        self
    }

    /// Replaces how files are opened.
    pub fn opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_server_backoffs(mut self, max: u32) -> Self {
        self.max_server_backoffs = max;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Chunk size used when `start` does not pick one.
    pub fn default_chunk_size_kb(mut self, kb: u64) -> Self {
        self.chunk_size_kb = kb;
        self
    }

    /// Retry ceiling used when `start` does not pick one.
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Attaches a network observer at construction.
    pub fn network(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.network = Some(observer);
        self
    }

    /// Spawns the session actor. Must be called within a tokio runtime.
    pub fn build(self) -> UploadSession {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(self.event_capacity.max(1));

        let actor = SessionActor::new(
            self.transport,
            self.backoff,
            self.max_server_backoffs,
            events.clone(),
            internal_tx.clone(),
            self.network,
        );
        tokio::spawn(actor.run(commands_rx, internal_rx));

        UploadSession {
            commands: commands_tx,
            events,
            opener: self.opener,
            default_chunk_size_kb: self.chunk_size_kb,
            default_max_retries: self.max_retries,
            #[cfg(test)]
            internal: internal_tx,
        }
    }
}

//! The session actor: sole owner of upload state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkup_protocol::constants::{
    CHUNK_METHOD, CONTENT_RANGE_HEADER, CONTENT_TYPE_HEADER, RANGE_HEADER,
};
use chunkup_protocol::{
    ByteRange, ProtocolError, ResponseClass, classify_status, parse_acknowledged_end,
};
use chunkup_transfer::{ChunkPlan, ChunkSource, ValidatedUpload, overall_progress};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{Command, ProgressHandler};
use crate::backoff::BackoffPolicy;
use crate::error::UploadError;
use crate::network::NetworkObserver;
use crate::transport::{ChunkRequest, Transport, TransportResponse, UploadProgressFn};
use crate::types::{SessionSnapshot, UploadEvent, UploadState};

type SharedSource = Arc<Mutex<Box<dyn ChunkSource>>>;

/// Messages from the actor's own tasks. Each carries the generation of
/// the transfer or timer that sent it.
pub(crate) enum Internal {
    Progress {
        generation: u64,
        sent: u64,
        expected: u64,
    },
    Finished {
        generation: u64,
        outcome: Result<TransportResponse, UploadError>,
    },
    RetryDue {
        generation: u64,
    },
}

/// The upload currently owned by the session.
struct Upload {
    id: Uuid,
    endpoint: String,
    content_type: &'static str,
    plan: ChunkPlan,
    /// Released when the upload reaches a terminal state.
    source: Option<SharedSource>,
    chunk_index: u64,
    retry_count: u32,
    max_retries: u32,
    server_backoffs: u32,
}

impl Upload {
    fn range(&self) -> ByteRange {
        self.plan.range(self.chunk_index)
    }

    fn within_retry_ceiling(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn is_complete(&self) -> bool {
        self.chunk_index >= self.plan.total_chunks()
    }
}

struct TransferHandle {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct RetryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub(super) struct SessionActor {
    transport: Arc<dyn Transport>,
    backoff: BackoffPolicy,
    max_server_backoffs: u32,
    events: broadcast::Sender<UploadEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    progress_handler: Option<ProgressHandler>,

    observer: Option<Arc<dyn NetworkObserver>>,
    network_rx: Option<watch::Receiver<bool>>,
    reachable: bool,

    state: UploadState,
    upload: Option<Upload>,
    generation: u64,
    transfer: Option<TransferHandle>,
    retry: Option<RetryTimer>,
    paused_while_offline: bool,
    stalled: bool,
}

impl SessionActor {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        backoff: BackoffPolicy,
        max_server_backoffs: u32,
        events: broadcast::Sender<UploadEvent>,
        internal_tx: mpsc::UnboundedSender<Internal>,
        observer: Option<Arc<dyn NetworkObserver>>,
    ) -> Self {
        let network_rx = observer.as_ref().map(|o| o.subscribe());
        Self {
            transport,
            backoff,
            max_server_backoffs,
            events,
            internal_tx,
            progress_handler: None,
            observer,
            network_rx,
            reachable: true,
            state: UploadState::Idle,
            upload: None,
            generation: 0,
            transfer: None,
            retry: None,
            paused_while_offline: false,
            stalled: false,
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!("upload session started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                change = next_reachability(&mut self.network_rx) => match change {
                    Some(reachable) => self.on_network_change(reachable).await,
                    None => {
                        debug!("network observer closed");
                        self.network_rx = None;
                    }
                },
            }
        }
        self.cancel_transfer().await;
        debug!("upload session stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                upload,
                endpoint,
                content_type,
                max_retries,
                reply,
            } => {
                self.start(upload, endpoint, content_type, max_retries).await;
                let _ = reply.send(());
            }
            Command::Pause => self.pause().await,
            Command::Resume => self.resume(),
            Command::Abort => self.abort().await,
            Command::Reset => self.reset().await,
            Command::NetworkChange(reachable) => self.on_network_change(reachable).await,
            Command::Foreground => {
                if let Some(observer) = &self.observer {
                    debug!("foreground: re-subscribing to network observer");
                    self.network_rx = Some(observer.subscribe());
                }
            }
            Command::AttachNetwork(observer) => {
                self.network_rx = Some(observer.subscribe());
                self.observer = Some(observer);
            }
            Command::SetProgressHandler(handler) => self.progress_handler = handler,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Progress {
                generation,
                sent,
                expected,
            } => {
                if self.is_current_transfer(generation) {
                    self.on_progress(sent, expected);
                }
            }
            Internal::Finished {
                generation,
                outcome,
            } => {
                if !self.is_current_transfer(generation) {
                    debug!(generation, "dropping stale transfer completion");
                    return;
                }
                self.transfer = None;
                self.on_finished(outcome);
            }
            Internal::RetryDue { generation } => {
                if self.retry.as_ref().is_none_or(|r| r.generation != generation) {
                    debug!(generation, "dropping stale retry timer");
                    return;
                }
                self.retry = None;
                if self.state == UploadState::Active && !self.stalled {
                    self.request_chunk();
                }
            }
        }
    }

    fn is_current_transfer(&self, generation: u64) -> bool {
        self.transfer
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    // Lifecycle

    async fn start(
        &mut self,
        validated: ValidatedUpload,
        endpoint: String,
        content_type: &'static str,
        max_retries: u32,
    ) {
        if self.upload.is_some() && !self.state.is_terminal() {
            info!(state = ?self.state, "replacing running upload");
        }
        self.cancel_transfer().await;

        let ValidatedUpload {
            source,
            file_size,
            chunk_size,
        } = validated;
        let plan = ChunkPlan::new(file_size, chunk_size);
        let upload = Upload {
            id: Uuid::new_v4(),
            endpoint,
            content_type,
            plan,
            source: Some(Arc::new(Mutex::new(source))),
            chunk_index: 0,
            retry_count: 0,
            max_retries,
            server_backoffs: 0,
        };
        let id = upload.id;
        let total_chunks = plan.total_chunks();
        info!(
            upload_id = %id,
            file_size,
            chunk_size,
            total_chunks,
            max_retries,
            "upload started"
        );

        self.upload = Some(upload);
        self.stalled = false;
        self.paused_while_offline = false;
        self.state = if self.reachable {
            UploadState::Active
        } else {
            info!(upload_id = %id, "network unreachable, waiting to begin");
            UploadState::Offline
        };

        self.emit(UploadEvent::Started {
            upload_id: id,
            file_size,
            total_chunks,
        });
        if self.state == UploadState::Active {
            self.request_chunk();
        }
    }

    async fn pause(&mut self) {
        let pausable = self.state == UploadState::Active
            && self.upload.as_ref().is_some_and(Upload::within_retry_ceiling);
        if !pausable {
            debug!(state = ?self.state, "pause ignored");
            return;
        }
        self.cancel_transfer().await;
        self.state = UploadState::Paused;
        info!("upload paused");
        self.emit(UploadEvent::Paused);
    }

    fn resume(&mut self) {
        let Some(upload) = self.upload.as_mut() else {
            return;
        };
        if self.state != UploadState::Paused || !upload.within_retry_ceiling() {
            debug!(state = ?self.state, "resume ignored");
            return;
        }
        upload.server_backoffs = 0;
        let complete = upload.is_complete();
        self.stalled = false;
        self.state = UploadState::Active;
        info!("upload resumed");
        self.emit(UploadEvent::Resumed);
        if !complete {
            self.request_chunk();
        }
    }

    async fn abort(&mut self) {
        if !matches!(
            self.state,
            UploadState::Active | UploadState::Paused | UploadState::Offline
        ) {
            debug!(state = ?self.state, "abort ignored");
            return;
        }
        self.cancel_transfer().await;
        self.clear_upload();
        self.state = UploadState::Aborted;
        info!("upload aborted");
        self.emit(UploadEvent::Aborted);
    }

    async fn reset(&mut self) {
        self.cancel_transfer().await;
        self.clear_upload();
        self.state = UploadState::Idle;
        debug!("session reset");
    }

    fn clear_upload(&mut self) {
        self.upload = None;
        self.stalled = false;
        self.paused_while_offline = false;
    }

    async fn on_network_change(&mut self, reachable: bool) {
        if reachable == self.reachable {
            trace!(reachable, "reachability unchanged");
            return;
        }
        self.reachable = reachable;

        if !reachable {
            if matches!(self.state, UploadState::Active | UploadState::Paused) {
                self.paused_while_offline = self.state == UploadState::Paused;
                self.cancel_transfer().await;
                self.state = UploadState::Offline;
            }
            warn!(state = ?self.state, "network offline");
            self.emit(UploadEvent::Offline);
            return;
        }

        let mut reissue = false;
        if self.state == UploadState::Offline {
            if self.paused_while_offline {
                self.paused_while_offline = false;
                self.state = UploadState::Paused;
            } else if let Some(upload) = self.upload.as_mut() {
                upload.server_backoffs = 0;
                self.stalled = false;
                self.state = UploadState::Active;
                reissue = !upload.is_complete();
            }
        }
        info!(state = ?self.state, "network online");
        self.emit(UploadEvent::Online);
        if reissue {
            self.request_chunk();
        }
    }

    // Transfers

    /// Issues the current chunk. Callers guarantee the session is active.
    fn request_chunk(&mut self) {
        let Some(upload) = self.upload.as_ref() else {
            return;
        };
        let Some(source) = upload.source.clone() else {
            warn!(upload_id = %upload.id, "chunk requested after source was released");
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let range = upload.range();
        let chunk = upload.chunk_index + 1;
        let total_chunks = upload.plan.total_chunks();
        debug!(
            upload_id = %upload.id,
            chunk,
            total_chunks,
            start = range.start,
            end = range.end,
            generation,
            "requesting chunk"
        );

        let task = TransferTask {
            transport: Arc::clone(&self.transport),
            source,
            url: upload.endpoint.clone(),
            content_type: upload.content_type,
            range,
            file_size: upload.plan.file_size(),
            generation,
            internal_tx: self.internal_tx.clone(),
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));
        self.transfer = Some(TransferHandle {
            generation,
            cancel,
            handle,
        });

        self.emit(UploadEvent::ChunkAttempt {
            chunk,
            total_chunks,
        });
    }

    /// Stops the in-flight transfer and any pending retry. Returns once the
    /// transfer task has ended.
    async fn cancel_transfer(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.handle.abort();
        }
        if let Some(transfer) = self.transfer.take() {
            debug!(generation = transfer.generation, "cancelling transfer");
            transfer.cancel.cancel();
            transfer.handle.abort();
            let _ = transfer.handle.await;
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        if let Some(previous) = self.retry.take() {
            previous.handle.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        let internal_tx = self.internal_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(Internal::RetryDue { generation });
        });
        self.retry = Some(RetryTimer { generation, handle });
    }

    fn on_progress(&mut self, sent: u64, expected: u64) {
        let Some(upload) = self.upload.as_ref() else {
            return;
        };
        let progress = overall_progress(&upload.plan, upload.chunk_index, sent, expected);
        trace!(upload_id = %upload.id, sent, expected, progress, "chunk progress");
        self.report_progress(progress);
    }

    fn report_progress(&self, progress: f64) {
        if let Some(handler) = &self.progress_handler {
            handler(progress);
        }
        self.emit(UploadEvent::Progress { progress });
    }

    fn on_finished(&mut self, outcome: Result<TransportResponse, UploadError>) {
        if self.state != UploadState::Active {
            return;
        }
        let response = match outcome {
            Ok(response) => response,
            Err(error) => return self.chunk_failed(error),
        };

        match classify_status(response.status) {
            ResponseClass::Accepted => self.chunk_succeeded(),
            ResponseClass::ResumeIncomplete => {
                let Some(last) = self.upload.as_ref().map(|u| u.range().last_byte()) else {
                    return;
                };
                match acknowledged_end(&response, last) {
                    Ok(acknowledged) if acknowledged == last => self.chunk_succeeded(),
                    Ok(acknowledged) => {
                        debug!(acknowledged, chunk_last = last, "partial acknowledgement, re-sending chunk");
                        self.server_busy(response.status);
                    }
                    Err(error) => self.chunk_failed(error.into()),
                }
            }
            ResponseClass::Busy => self.server_busy(response.status),
            ResponseClass::Rejected => {
                self.chunk_failed(UploadError::UnexpectedStatus(response.status))
            }
        }
    }

    fn chunk_succeeded(&mut self) {
        let Some(upload) = self.upload.as_mut() else {
            return;
        };
        upload.retry_count = 0;
        upload.server_backoffs = 0;
        upload.chunk_index += 1;
        let chunk = upload.chunk_index;
        let total_chunks = upload.plan.total_chunks();
        let progress = overall_progress(&upload.plan, upload.chunk_index, 0, 0);
        let complete = upload.is_complete();
        let id = upload.id;
        if complete {
            upload.source = None;
        }
        self.stalled = false;
        debug!(upload_id = %id, chunk, total_chunks, "chunk acknowledged");

        if complete {
            self.state = UploadState::Completed;
        }
        self.emit(UploadEvent::ChunkSuccess {
            chunk,
            total_chunks,
        });
        self.report_progress(progress);

        if complete {
            info!(upload_id = %id, total_chunks, "upload complete");
            self.emit(UploadEvent::Success);
        } else {
            self.request_chunk();
        }
    }

    fn chunk_failed(&mut self, error: UploadError) {
        let Some(upload) = self.upload.as_mut() else {
            return;
        };
        let chunk = upload.chunk_index + 1;
        let total_chunks = upload.plan.total_chunks();
        let attempt = upload.retry_count + 1;
        let id = upload.id;

        if upload.within_retry_ceiling() {
            let delay = self.backoff.delay(upload.retry_count);
            upload.retry_count += 1;
            warn!(upload_id = %id, chunk, attempt, ?delay, %error, "chunk attempt failed, retrying");
            self.emit(UploadEvent::ChunkAttemptFailure {
                chunk,
                total_chunks,
                attempt,
                error,
            });
            self.schedule_retry(delay);
            return;
        }

        upload.source = None;
        self.state = UploadState::Failed;
        warn!(upload_id = %id, chunk, attempt, %error, "chunk attempt failed, giving up");
        self.emit(UploadEvent::ChunkAttemptFailure {
            chunk,
            total_chunks,
            attempt,
            error: error.clone(),
        });
        self.emit(UploadEvent::Failure {
            error: UploadError::RetriesExhausted {
                chunk,
                attempts: attempt,
                last: Box::new(error),
            },
        });
    }

    fn server_busy(&mut self, status: u16) {
        let Some(upload) = self.upload.as_mut() else {
            return;
        };
        upload.server_backoffs = upload.server_backoffs.saturating_add(1);
        let consecutive = upload.server_backoffs;
        let id = upload.id;

        if consecutive >= self.max_server_backoffs {
            self.stalled = true;
            warn!(upload_id = %id, status, consecutive, "server busy, backoff ceiling reached");
            self.emit(UploadEvent::Warning {
                error: UploadError::ServerBusy {
                    status,
                    consecutive,
                },
            });
            return;
        }

        let delay = self.backoff.delay(consecutive);
        warn!(upload_id = %id, status, consecutive, ?delay, "server busy, backing off");
        self.schedule_retry(delay);
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let upload = self.upload.as_ref();
        SessionSnapshot {
            upload_id: upload.map(|u| u.id),
            state: self.state,
            file_size: upload.map_or(0, |u| u.plan.file_size()),
            chunk_size: upload.map_or(0, |u| u.plan.chunk_size()),
            total_chunks: upload.map_or(0, |u| u.plan.total_chunks()),
            chunk_index: upload.map_or(0, |u| u.chunk_index),
            chunk_range: upload.map(Upload::range).unwrap_or_default(),
            chunk_retry_count: upload.map_or(0, |u| u.retry_count),
            max_chunk_retries: upload.map_or(0, |u| u.max_retries),
            consecutive_server_backoffs: upload.map_or(0, |u| u.server_backoffs),
            stalled: self.stalled,
            transfer_in_flight: self.transfer.is_some(),
            reachable: self.reachable,
        }
    }
}

/// Inclusive end acknowledged by a resume-incomplete response, checked
/// against the chunk's last byte.
fn acknowledged_end(response: &TransportResponse, chunk_last: u64) -> Result<u64, ProtocolError> {
    let value = response
        .header(RANGE_HEADER)
        .ok_or(ProtocolError::MissingRange)?;
    let acknowledged = parse_acknowledged_end(value)?;
    if acknowledged > chunk_last {
        return Err(ProtocolError::AcknowledgedPastChunk {
            acknowledged,
            chunk_last,
        });
    }
    Ok(acknowledged)
}

/// Waits for the next reachability value. Pends forever without an
/// observer; yields `None` once the observer's sender is gone.
async fn next_reachability(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// One chunk transfer, run on its own task.
struct TransferTask {
    transport: Arc<dyn Transport>,
    source: SharedSource,
    url: String,
    content_type: &'static str,
    range: ByteRange,
    file_size: u64,
    generation: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl TransferTask {
    async fn run(self, cancel: CancellationToken) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = self.execute() => outcome,
        };
        let _ = self.internal_tx.send(Internal::Finished {
            generation: self.generation,
            outcome,
        });
    }

    async fn execute(&self) -> Result<TransportResponse, UploadError> {
        let body = self.read_chunk().await?;

        let internal_tx = self.internal_tx.clone();
        let generation = self.generation;
        let progress: UploadProgressFn = Arc::new(move |sent, expected| {
            let _ = internal_tx.send(Internal::Progress {
                generation,
                sent,
                expected,
            });
        });

        let request = ChunkRequest {
            method: CHUNK_METHOD.to_string(),
            url: self.url.clone(),
            headers: vec![
                (CONTENT_TYPE_HEADER.to_string(), self.content_type.to_string()),
                (
                    CONTENT_RANGE_HEADER.to_string(),
                    self.range.content_range(self.file_size),
                ),
            ],
            body,
        };
        Ok(self.transport.send(request, progress).await?)
    }

    /// Reads the chunk's bytes on the blocking pool.
    async fn read_chunk(&self) -> Result<Vec<u8>, UploadError> {
        let source = Arc::clone(&self.source);
        let range = self.range;
        let body = tokio::task::spawn_blocking(move || {
            let mut source = source
                .lock()
                .map_err(|_| UploadError::ChunkRead("chunk source lock poisoned".into()))?;
            source
                .read(range.start, range.len())
                .map_err(|e| UploadError::ChunkRead(e.to_string()))
        })
        .await
        .map_err(|e| UploadError::ChunkRead(e.to_string()))??;

        if body.len() as u64 != range.len() {
            return Err(UploadError::ChunkRead(format!(
                "expected {} bytes at offset {}, read {}",
                range.len(),
                range.start,
                body.len()
            )));
        }
        Ok(body)
    }
}

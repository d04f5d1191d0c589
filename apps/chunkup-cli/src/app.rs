//! Runs one upload and reports its events.

use std::process::ExitCode;
use std::sync::Arc;

use chunkup_uploader::{
    HttpTransport, ReachabilityProbe, UploadEvent, UploadOptions, UploadSession, UploaderConfig,
    WatchNetworkObserver,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::Args;

/// How the upload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Uploaded,
    Failed,
    Aborted,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Uploaded => ExitCode::SUCCESS,
            Self::Failed => ExitCode::from(1),
            Self::Aborted => ExitCode::from(130),
        }
    }
}

/// Uploads `args.file` and prints events until the upload ends.
pub async fn run(args: Args, config: UploaderConfig) -> anyhow::Result<Outcome> {
    let cancel = CancellationToken::new();
    let transport = Arc::new(HttpTransport::new(config.idle_timeout())?);
    let mut builder = UploadSession::builder(transport).config(&config);
    let mut probe_task = None;

    if args.probe {
        match ReachabilityProbe::for_endpoint(&args.endpoint) {
            Some(probe) => {
                let observer = WatchNetworkObserver::new(true);
                tracing::info!(target_addr = probe.target(), "reachability probe enabled");
                probe_task = Some(probe.spawn(observer.clone(), cancel.clone()));
                builder = builder.network(Arc::new(observer));
            }
            None => tracing::warn!(endpoint = %args.endpoint, "cannot probe endpoint without a host"),
        }
    }

    let session = builder.build();
    let mut events = session.subscribe();
    let options = UploadOptions {
        chunk_size_kb: args.chunk_size_kb,
        max_retries: args.max_retries,
        max_file_size_kb: args.max_file_size_kb,
    };
    session.start(&args.file, &args.endpoint, options).await?;

    let mut printer = EventPrinter::new(args.json);
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, aborting upload");
                session.abort()?;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    printer.print(&event)?;
                    match event {
                        UploadEvent::Success => break Outcome::Uploaded,
                        UploadEvent::Failure { .. } => break Outcome::Failed,
                        UploadEvent::Aborted => break Outcome::Aborted,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => anyhow::bail!("upload session stopped unexpectedly"),
            },
        }
    };

    cancel.cancel();
    if let Some(task) = probe_task {
        let _ = task.await;
    }
    tracing::info!(?outcome, "upload finished");
    Ok(outcome)
}

/// Writes events to stdout, either as JSON lines or as short text lines.
struct EventPrinter {
    json: bool,
    last_percent: Option<u32>,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_percent: None,
        }
    }

    fn print(&mut self, event: &UploadEvent) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
        } else if let Some(line) = self.describe(event) {
            println!("{line}");
        }
        Ok(())
    }

    /// Human-readable line for `event`; progress is reported once per percent.
    fn describe(&mut self, event: &UploadEvent) -> Option<String> {
        let line = match event {
            UploadEvent::Started {
                upload_id,
                file_size,
                total_chunks,
            } => format!("upload {upload_id}: {file_size} bytes in {total_chunks} chunks"),
            UploadEvent::ChunkAttempt {
                chunk,
                total_chunks,
            } => format!("sending chunk {chunk}/{total_chunks}"),
            UploadEvent::ChunkSuccess {
                chunk,
                total_chunks,
            } => format!("chunk {chunk}/{total_chunks} stored"),
            UploadEvent::ChunkAttemptFailure {
                chunk,
                attempt,
                error,
                ..
            } => format!("chunk {chunk} attempt {attempt} failed: {error}"),
            UploadEvent::Progress { progress } => {
                let percent = (progress * 100.0).floor() as u32;
                if self.last_percent == Some(percent) {
                    return None;
                }
                self.last_percent = Some(percent);
                format!("{percent}%")
            }
            UploadEvent::Success => "upload complete".to_string(),
            UploadEvent::Failure { error } => format!("upload failed: {error}"),
            UploadEvent::Warning { error } => format!("warning: {error}"),
            UploadEvent::Paused => "paused".to_string(),
            UploadEvent::Resumed => "resumed".to_string(),
            UploadEvent::Online => "network online".to_string(),
            UploadEvent::Offline => "network offline".to_string(),
            UploadEvent::Aborted => "upload aborted".to_string(),
        };
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_printed_once_per_percent() {
        let mut printer = EventPrinter::new(false);
        assert_eq!(
            printer.describe(&UploadEvent::Progress { progress: 0.421 }),
            Some("42%".to_string())
        );
        assert_eq!(
            printer.describe(&UploadEvent::Progress { progress: 0.429 }),
            None
        );
        assert_eq!(
            printer.describe(&UploadEvent::Progress { progress: 1.0 }),
            Some("100%".to_string())
        );
    }

    #[test]
    fn describes_chunk_events() {
        let mut printer = EventPrinter::new(false);
        assert_eq!(
            printer
                .describe(&UploadEvent::ChunkSuccess {
                    chunk: 2,
                    total_chunks: 3
                })
                .as_deref(),
            Some("chunk 2/3 stored")
        );
    }
}

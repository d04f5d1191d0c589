//! Transport trait and the `reqwest` implementation.
//!
//! `Transport` is the seam between the session state machine and HTTP.
//! Using a trait keeps the state machine testable with scripted mocks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream;
use reqwest::header::CONTENT_LENGTH;
use tokio::time::Instant;
use tracing::trace;

use crate::error::TransportError;

/// Size of the pieces a chunk body is streamed in; progress is reported
/// once per piece.
const BODY_PIECE_SIZE: usize = 256 * 1024;

/// Upload progress callback: `(bytes_sent, bytes_expected)` for one request.
pub type UploadProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One chunk request.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ChunkRequest {
    /// Returns the first header named `name` (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and headers of a response. Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    /// Adds a header, normalizing its name to lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Performs single chunk requests.
///
/// Implementations must be cancellable by dropping the returned future.
pub trait Transport: Send + Sync {
    /// Sends `request`, reporting body progress through `progress`.
    fn send(
        &self,
        request: ChunkRequest,
        progress: UploadProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>>;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    http: reqwest::Client,
    idle_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with an optional idle timeout.
    ///
    /// A request times out only after `idle_timeout` passes with no body
    /// piece written and no response received. A slow link that keeps
    /// moving bytes never trips it, whatever the chunk size.
    pub fn new(idle_timeout: Option<Duration>) -> Result<Self, TransportError> {
        // 308 means "resume incomplete" here, never a redirect.
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(idle) = idle_timeout {
            builder = builder.connect_timeout(idle);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { http, idle_timeout })
    }

    /// Wraps an existing client. The client should not follow redirects.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            idle_timeout: None,
        }
    }
}

/// Time of the last observed progress on one request.
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.started.elapsed().as_millis() as u64;
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.started + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Drives `request`, failing with `Timeout` once `idle` passes without activity.
async fn with_idle_timeout<F>(
    request: F,
    activity: &Activity,
    idle: Duration,
) -> Result<reqwest::Response, TransportError>
where
    F: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    tokio::pin!(request);
    loop {
        tokio::select! {
            result = &mut request => return result.map_err(map_reqwest_error),
            _ = tokio::time::sleep_until(activity.last() + idle) => {
                if activity.last().elapsed() >= idle {
                    return Err(TransportError::Timeout);
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ChunkRequest,
        progress: UploadProgressFn,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let total = request.body.len() as u64;

            let mut builder = self
                .http
                .request(method, &request.url)
                .header(CONTENT_LENGTH, total);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let activity = Arc::new(Activity::new());
            let observed = Arc::clone(&activity);
            let body_progress: UploadProgressFn = Arc::new(move |sent, expected| {
                observed.touch();
                progress(sent, expected);
            });

            let pending = builder.body(progress_body(request.body, body_progress)).send();
            let resp = match self.idle_timeout {
                Some(idle) => with_idle_timeout(pending, &activity, idle).await?,
                None => pending.await.map_err(map_reqwest_error)?,
            };

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            trace!(status, url = %request.url, "chunk response received");

            Ok(TransportResponse { status, headers })
        })
    }
}

/// Streams `data` in pieces, reporting cumulative bytes as each piece is
/// handed to the connection.
fn progress_body(data: Vec<u8>, progress: UploadProgressFn) -> reqwest::Body {
    let total = data.len() as u64;
    let pieces: Vec<Vec<u8>> = data.chunks(BODY_PIECE_SIZE).map(<[u8]>::to_vec).collect();
    drop(data);

    let mut sent = 0u64;
    let body = stream::iter(pieces.into_iter().map(move |piece| {
        sent += piece.len() as u64;
        progress(sent, total);
        Ok::<_, std::io::Error>(piece)
    }));
    reqwest::Body::wrap_stream(body)
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

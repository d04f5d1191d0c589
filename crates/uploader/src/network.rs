//! Network reachability sources.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of network reachability changes.
///
/// A session subscribes once when the observer is attached and again on
/// every [`UploadSession::on_foreground`](crate::UploadSession::on_foreground).
/// A fresh receiver must yield the current value at least once.
pub trait NetworkObserver: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Observer driven by explicit [`set_reachable`](Self::set_reachable) calls.
#[derive(Clone)]
pub struct WatchNetworkObserver {
    tx: Arc<watch::Sender<bool>>,
}

impl WatchNetworkObserver {
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes a new reachability value. Repeated values are not re-sent.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            debug!(reachable, "reachability changed");
        }
    }

    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for WatchNetworkObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkObserver for WatchNetworkObserver {
    fn subscribe(&self) -> watch::Receiver<bool> {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        rx
    }
}

/// Periodic TCP connect check against the upload host.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            timeout,
        }
    }

    /// Probes the host and port of an upload endpoint every five seconds.
    ///
    /// Returns `None` when the endpoint has no host.
    pub fn for_endpoint(endpoint: &str) -> Option<Self> {
        let url = reqwest::Url::parse(endpoint).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        // IPv6 hosts come back already bracketed.
        Some(Self::new(
            format!("{host}:{port}"),
            Duration::from_secs(5),
            Duration::from_secs(3),
        ))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Runs one connect attempt.
    pub async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    /// Spawns the probe loop, publishing into `observer` until `cancel` fires.
    pub fn spawn(self, observer: WatchNetworkObserver, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(target_addr = %self.target, interval = ?self.interval, "reachability probe started");
            loop {
                let reachable = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = self.check() => r,
                };
                observer.set_reachable(reachable);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            debug!(target_addr = %self.target, "reachability probe stopped");
        })
    }
}

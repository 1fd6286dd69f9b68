//! Background reloading of the feed snapshot file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use miris_core::chain::ReconnectPolicy;
use miris_core::FeedSnapshot;

use crate::config::SnapshotConfig;
use crate::error::{MirisMcpError, Result};

pub type SharedSnapshot = Arc<RwLock<Option<FeedSnapshot>>>;

/// Read and adapt a snapshot file holding raw feeds.
pub async fn load_snapshot(path: &Path) -> Result<FeedSnapshot> {
    let text = tokio::fs::read_to_string(path).await?;
    FeedSnapshot::from_json_str(&text)
        .map_err(|e| MirisMcpError::Snapshot(format!("{}: {}", path.display(), e)))
}

/// Periodically reloads a snapshot file into shared state.
///
/// Failed reloads are logged and retried after the fixed retry delay,
/// forever. The last good snapshot stays visible in the meantime.
pub struct SnapshotPoller {
    path: PathBuf,
    poll_interval: Duration,
    retry: ReconnectPolicy,
    latest: SharedSnapshot,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotPoller {
    pub fn new(path: PathBuf, config: &SnapshotConfig) -> Self {
        Self {
            path,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            retry: ReconnectPolicy::new(Duration::from_secs(config.retry_delay_secs)),
            latest: Arc::new(RwLock::new(None)),
            cancel_token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Handle to the snapshot slot, shared with tool handlers
    pub fn shared(&self) -> SharedSnapshot {
        Arc::clone(&self.latest)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the reload task. Returns false if it is already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if self.cancel_token.is_cancelled() {
            self.cancel_token = CancellationToken::new();
        }

        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let retry = self.retry;
        let latest = Arc::clone(&self.latest);
        let cancel_token = self.cancel_token.clone();

        tracing::info!(path = %path.display(), interval_secs = poll_interval.as_secs(), "Starting snapshot poller");

        self.handle = Some(tokio::spawn(async move {
            let mut failures: u32 = 0;

            loop {
                if cancel_token.is_cancelled() {
                    break;
                }

                let wait = match load_snapshot(&path).await {
                    Ok(snapshot) => {
                        if failures > 0 {
                            tracing::info!(path = %path.display(), failures, "Snapshot reload recovered");
                        }
                        failures = 0;
                        tracing::debug!(path = %path.display(), empty = snapshot.is_empty(), "Snapshot reloaded");
                        *latest.write().await = Some(snapshot);
                        poll_interval
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        tracing::warn!(path = %path.display(), error = %e, attempt = failures, "Snapshot reload failed");
                        retry.delay_for(failures)
                    }
                };

                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            tracing::info!(path = %path.display(), "Snapshot poller stopped");
        }));

        true
    }

    /// Cancel the reload task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Snapshot poller task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FEEDS: &str = r#"{
        "orderBook": { "KuruOrderBook_Trade": [
            { "id": "t1", "filledSize": "10", "price": "2" }
        ]}
    }"#;

    impl SnapshotPoller {
        fn with_intervals(mut self, poll_interval: Duration, retry_delay: Duration) -> Self {
            self.poll_interval = poll_interval;
            self.retry = ReconnectPolicy::new(retry_delay);
            self
        }

        async fn latest(&self) -> Option<FeedSnapshot> {
            self.latest.read().await.clone()
        }
    }

    fn poller(path: PathBuf) -> SnapshotPoller {
        SnapshotPoller::new(path, &SnapshotConfig::default())
            .with_intervals(Duration::from_millis(20), Duration::from_millis(20))
    }

    async fn wait_for_snapshot(poller: &SnapshotPoller) -> Option<FeedSnapshot> {
        for _ in 0..100 {
            if let Some(snapshot) = poller.latest().await {
                return Some(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FEEDS.as_bytes()).unwrap();

        let snapshot = load_snapshot(file.path()).await.unwrap();
        assert_eq!(snapshot.order_book.len(), 1);
    }

    #[tokio::test]
    async fn test_load_snapshot_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let result = load_snapshot(file.path()).await;
        assert!(matches!(result, Err(MirisMcpError::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_poller_start_and_stop() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FEEDS.as_bytes()).unwrap();

        let mut poller = poller(file.path().to_path_buf());
        assert!(poller.start());
        assert!(!poller.start());

        let snapshot = wait_for_snapshot(&poller).await.unwrap();
        assert_eq!(snapshot.order_book[0].notional(), Some(20.0));

        poller.stop().await;
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_poller_retries_until_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.json");

        let mut poller = poller(path.clone());
        poller.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.latest().await.is_none());
        assert!(poller.is_running());

        std::fs::write(&path, FEEDS).unwrap();
        assert!(wait_for_snapshot(&poller).await.is_some());

        poller.stop().await;
    }
}

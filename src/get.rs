use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    classify::{error_summary, StatusResponse},
    download::Downloader,
    post::{read_bytes, read_text, send},
    Artifact, RemoteRequestHandle, ScanClientConfig, ScanError, ScanId, ScanRequest,
};

/// Waits for a deferred scan request to finish, then hands it to the [`Downloader`].
///
/// Polling is a fixed-delay loop: one status query, one sleep of
/// `poll_interval`, repeated until a terminal status with a scan id is seen or
/// `poll_timeout` has elapsed since the first query. Failed status queries
/// count as "not ready yet" and do not reset the deadline. Neither a status
/// query nor a sleep runs past the deadline.
#[derive(Clone, Debug)]
pub struct Poller {
    http: Client,
    config: Arc<ScanClientConfig>,
}

impl Poller {
    pub fn new(http: Client, config: Arc<ScanClientConfig>) -> Self {
        Self { http, config }
    }

    /// Polls until the scan is ready and downloads it exactly once.
    pub async fn run(
        &self,
        handle: &RemoteRequestHandle,
        request: &ScanRequest,
        downloader: &Downloader,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        let scan_id = self.wait_for_scan(handle, cancel).await?;
        downloader.fetch_by_id(&scan_id, request, cancel).await
    }

    /// Polls `GET /api/request_status/{request_id}` until a terminal status.
    pub async fn wait_for_scan(
        &self,
        handle: &RemoteRequestHandle,
        cancel: &CancellationToken,
    ) -> Result<ScanId, ScanError> {
        let url = self
            .config
            .endpoint(&format!("/api/request_status/{}", handle));
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.config.poll_timeout {
                warn!(
                    "Request {} still not ready after {} status queries ({:?})",
                    handle, attempt, elapsed
                );
                return Err(ScanError::TimedOut { elapsed });
            }

            attempt += 1;
            let remaining = self.config.poll_timeout - elapsed;
            let query_timeout = self.config.status_timeout.min(remaining);
            match self.get_status(&url, query_timeout, cancel).await {
                Ok(status) => {
                    debug!(
                        "Request {} status query {}: {:?}",
                        handle,
                        attempt,
                        status.status()
                    );
                    if let Some(scan_id) =
                        status.terminal_scan(|status| self.config.is_done_status(status))
                    {
                        info!(
                            "Request {} completed as scan {} after {:?}",
                            handle,
                            scan_id,
                            started.elapsed()
                        );
                        return Ok(scan_id);
                    }
                }
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => warn!("Status query {} for request {} failed: {}", attempt, handle, e),
            }

            let remaining = self
                .config
                .poll_timeout
                .saturating_sub(started.elapsed());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval.min(remaining)) => {}
            }
        }
    }

    async fn get_status(
        &self,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StatusResponse, ScanError> {
        let response = send(self.http.get(url), timeout, cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_text(response, timeout, cancel).await;
            return Err(ScanError::Protocol(error_summary(status, &body)));
        }

        let body = read_bytes(response, timeout, cancel).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ScanError::Protocol(format!("malformed status body: {}", e)))
    }
}

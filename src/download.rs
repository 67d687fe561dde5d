use std::{io, sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use futures_util::StreamExt;
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    classify::error_summary,
    post::{read_text, send},
    Artifact, ArtifactStore, ByteStream, ScanClientConfig, ScanError, ScanId, ScanRequest,
    StoreError,
};

/// Writes scan payloads to the artifact store under freshly generated names.
#[derive(Clone)]
pub struct Downloader {
    http: Client,
    config: Arc<ScanClientConfig>,
    store: Arc<dyn ArtifactStore>,
}

impl Downloader {
    pub fn new(http: Client, config: Arc<ScanClientConfig>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            http,
            config,
            store,
        }
    }

    /// Streams `body` into the store and returns the finished artifact.
    ///
    /// Nothing is returned, and nothing remains in the store, unless the whole
    /// payload was written.
    pub async fn save(
        &self,
        body: ByteStream,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        let filename = artifact_filename(request, Local::now());
        let start = std::time::Instant::now();

        let stored = self
            .store
            .write_stream(&filename, body, cancel)
            .await
            .map_err(|e| match e {
                StoreError::Cancelled => ScanError::Cancelled,
                StoreError::Stream(e) => {
                    error!("Download of {} interrupted: {}", filename, e);
                    ScanError::Transport(format!("download interrupted: {}", e))
                }
                e => {
                    error!("Error while storing {}: {}", filename, e);
                    ScanError::Storage(e)
                }
            })?;

        debug!("Time to store {} : {:?}", stored.filename, start.elapsed());
        info!("Scan saved as {} ({} bytes)", stored.filename, stored.size);

        Ok(Artifact {
            filename: stored.filename,
            path: stored.path,
            size: stored.size,
            description: request.description(),
        })
    }

    /// Downloads a finished scan with `GET /api/scans/download/{scan_id}` and stores it.
    pub async fn fetch_by_id(
        &self,
        scan_id: &ScanId,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        let url = self
            .config
            .endpoint(&format!("/api/scans/download/{}", scan_id));

        let response = send(self.http.get(&url), self.config.request_timeout, cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_text(response, self.config.request_timeout, cancel).await;
            error!("Error {} while downloading scan {}", status, scan_id);
            return Err(ScanError::Protocol(error_summary(status, &body)));
        }

        self.save(
            response_stream(response, self.config.request_timeout),
            request,
            cancel,
        )
        .await
    }
}

/// Adapts a response body to the store's stream type.
///
/// Each chunk must arrive within `idle` of the previous one, otherwise the
/// stream ends with an [`io::ErrorKind::TimedOut`] error.
pub(crate) fn response_stream(response: Response, idle: Duration) -> ByteStream {
    let body = Box::pin(response.bytes_stream());
    futures_util::stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(io::Error::new(io::ErrorKind::Other, e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received for {:?}", idle),
                )),
                None,
            )),
        }
    })
    .boxed()
}

/// `scan_<uhid>_<modality>_<region>_<YYYYmmdd_HHMMSS>.dcm`, made safe for a filesystem.
pub fn artifact_filename(request: &ScanRequest, at: DateTime<Local>) -> String {
    sanitize_filename(&format!(
        "scan_{}_{}_{}_{}.dcm",
        request.patient(),
        request.modality(),
        request.region(),
        at.format("%Y%m%d_%H%M%S")
    ))
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`. Whitespace and path
/// separators become `_`; anything else is dropped. Leading dots and
/// underscores are stripped so the result is never hidden.
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() || c == '/' || c == '\\' => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 8, 29, 14, 5, secs).unwrap()
    }

    #[test]
    fn test_artifact_filename() {
        let req = ScanRequest::new("SURGERY", "DERM-00007", "ct", "chest").unwrap();
        assert_eq!(
            artifact_filename(&req, at(9)),
            "scan_DERM-00007_CT_CHEST_20250829_140509.dcm"
        );
    }

    #[test]
    fn test_artifact_filename_differs_per_second() {
        let req = ScanRequest::new("SURGERY", "DERM001", "MR", "BRAIN").unwrap();
        assert_ne!(artifact_filename(&req, at(1)), artifact_filename(&req, at(2)));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("scan_P 1_X-RAY_LEFT KNEE.dcm"), "scan_P_1_X-RAY_LEFT_KNEE.dcm");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("scan_a\\b_ÉPAULE.dcm"), "scan_a_b_PAULE.dcm");
        assert_eq!(sanitize_filename("scan_<x>|y?.dcm"), "scan_xy.dcm");
    }
}

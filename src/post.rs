use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    classify::{classify, decode_request_id, error_summary, ResponseMode, BODY_EXCERPT_LIMIT},
    download::response_stream,
    ByteStream, RemoteRequestHandle, ScanClientConfig, ScanError, ScanRequest,
};

pub const SCAN_REQUEST_PATH: &str = "/api/v1/get_or_request_scan";

/// Sent with every request to the radiology service.
pub const ACCEPT: &str = "application/json, application/dicom, */*";

/// Error bodies are read up to this many bytes, enough for any excerpt.
const EXCERPT_READ_LIMIT: usize = BODY_EXCERPT_LIMIT * 4;

/// Result of the initial `get_or_request_scan` exchange.
pub enum TransportOutcome {
    /// The scan is in the response body.
    Immediate {
        content_type: Option<String>,
        body: ByteStream,
    },
    /// The service queued the request; poll with this handle.
    Accepted(RemoteRequestHandle),
    Failed(ScanError),
}

impl std::fmt::Debug for TransportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportOutcome::Immediate { content_type, .. } => f
                .debug_struct("Immediate")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            TransportOutcome::Accepted(handle) => f.debug_tuple("Accepted").field(handle).finish(),
            TransportOutcome::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// Builds the HTTP client shared by every component of a [`crate::ScanClient`].
pub fn build_http_client(config: &ScanClientConfig) -> Result<Client, ScanError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));

    Client::builder()
        .default_headers(headers)
        .connect_timeout(config.request_timeout)
        .build()
        .map_err(ScanError::transport)
}

/// Issues the single outbound scan request. No retries.
#[derive(Clone, Debug)]
pub struct Transport {
    http: Client,
    config: Arc<ScanClientConfig>,
}

impl Transport {
    pub fn new(http: Client, config: Arc<ScanClientConfig>) -> Self {
        Self { http, config }
    }

    /// Sends `POST /api/v1/get_or_request_scan` and classifies the answer.
    ///
    /// Never returns an error directly: every failure, including connection
    /// errors, timeouts and cancellation, comes back as [`TransportOutcome::Failed`].
    pub async fn request_scan(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> TransportOutcome {
        let url = self.config.endpoint(SCAN_REQUEST_PATH);
        let start = std::time::Instant::now();

        let response = match send(
            self.http.post(&url).json(request),
            self.config.request_timeout,
            cancel,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Error while requesting scan from {}: {}", url, e);
                return TransportOutcome::Failed(e);
            }
        };

        debug!("Time to answer scan request : {:?}", start.elapsed());

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        match classify(status, content_type.as_deref()) {
            ResponseMode::Binary => TransportOutcome::Immediate {
                content_type,
                body: response_stream(response, self.config.request_timeout),
            },
            ResponseMode::UnexpectedJson => {
                let body = read_text(response, self.config.request_timeout, cancel).await;
                warn!(
                    "Scan request answered 200 with a JSON body: {}",
                    error_summary(status, &body)
                );
                TransportOutcome::Failed(ScanError::Protocol("unexpected JSON body".to_string()))
            }
            ResponseMode::Accepted => {
                let body = match read_bytes(response, self.config.request_timeout, cancel).await {
                    Ok(body) => body,
                    Err(e) => return TransportOutcome::Failed(e),
                };
                match decode_request_id(&body) {
                    Ok(handle) => {
                        debug!("Scan request accepted with id {}", handle);
                        TransportOutcome::Accepted(handle)
                    }
                    Err(e) => {
                        warn!("{}: {}", e, String::from_utf8_lossy(&body));
                        TransportOutcome::Failed(e)
                    }
                }
            }
            ResponseMode::Rejected(status) => {
                let body = read_text(response, self.config.request_timeout, cancel).await;
                let summary = error_summary(status, &body);
                error!("Error {} while requesting scan: {}", status, summary);
                TransportOutcome::Failed(ScanError::Protocol(summary))
            }
        }
    }
}

/// Sends `request`, bounding the wait for response headers by `timeout`.
pub(crate) async fn send(
    request: RequestBuilder,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Response, ScanError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = tokio::time::timeout(timeout, request.send()) => match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ScanError::transport(e)),
            Err(_) => Err(ScanError::Transport(format!("no response within {:?}", timeout))),
        },
    }
}

pub(crate) async fn read_bytes(
    response: Response,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, ScanError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = tokio::time::timeout(timeout, response.bytes()) => match result {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(ScanError::transport(e)),
            Err(_) => Err(ScanError::Transport(format!("body not received within {:?}", timeout))),
        },
    }
}

/// Best-effort body text for error messages. Reading stops once enough bytes
/// for an excerpt have arrived; whatever came in before a failure is kept.
pub(crate) async fn read_text(
    response: Response,
    timeout: Duration,
    cancel: &CancellationToken,
) -> String {
    let mut chunks = Box::pin(response.bytes_stream());
    let mut body = Vec::new();
    let read = async {
        while let Some(Ok(chunk)) = chunks.next().await {
            body.extend_from_slice(&chunk);
            if body.len() >= EXCERPT_READ_LIMIT {
                break;
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = tokio::time::timeout(timeout, read) => {}
    }

    body.truncate(EXCERPT_READ_LIMIT);
    String::from_utf8_lossy(&body).into_owned()
}

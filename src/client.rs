use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::{
    download::Downloader,
    get::Poller,
    post::{build_http_client, Transport, TransportOutcome},
    records::{PatientRecords, Recorder},
    Artifact, ArtifactStore, FsArtifactStore, LinkRecord, ScanClientConfig, ScanError,
    ScanRequest,
};

/// Requests scans from the radiology service and links them to patients.
///
/// Calls are independent: two concurrent acquisitions for the same patient,
/// modality and region both run to completion and produce two artifacts and
/// two links.
#[derive(Clone)]
pub struct ScanClient {
    config: Arc<ScanClientConfig>,
    transport: Transport,
    poller: Poller,
    downloader: Downloader,
    recorder: Recorder,
}

impl ScanClient {
    pub fn new(
        config: ScanClientConfig,
        records: Arc<dyn PatientRecords>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let config = Arc::new(config);
        let http = build_http_client(&config)?;

        Ok(Self {
            transport: Transport::new(http.clone(), config.clone()),
            poller: Poller::new(http.clone(), config.clone()),
            downloader: Downloader::new(http, config.clone(), store),
            recorder: Recorder::new(records),
            config,
        })
    }

    /// A client storing artifacts as files under `config.upload_dir`.
    pub fn with_fs_store(
        config: ScanClientConfig,
        records: Arc<dyn PatientRecords>,
    ) -> Result<Self, ScanError> {
        let store = Arc::new(FsArtifactStore::new(config.upload_dir.clone()));
        Self::new(config, records, store)
    }

    pub fn config(&self) -> &ScanClientConfig {
        &self.config
    }

    /// Builds a request on behalf of the configured department.
    pub fn request(
        &self,
        patient: &str,
        modality: &str,
        region: &str,
    ) -> Result<ScanRequest, ScanError> {
        ScanRequest::new(&self.config.department, patient, modality, region)
    }

    /// Gets the scan for `patient` or requests it and waits for it.
    ///
    /// Inputs are validated before anything is sent. On success the artifact
    /// is stored and linked to the patient exactly once.
    pub async fn acquire_scan(
        &self,
        patient: &str,
        modality: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        let request = self.request(patient, modality, region)?;
        self.acquire(&request, cancel).await
    }

    /// Same as [`ScanClient::acquire_scan`] for a request built by the caller.
    pub async fn acquire(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        let span = info_span!(
            "acquire_scan",
            id = %uuid::Uuid::new_v4(),
            uhid = %request.patient(),
            modality = %request.modality(),
            region = %request.region(),
        );

        async {
            let result = self.run(request, cancel).await;
            match &result {
                Ok(artifact) => info!("Scan acquired: {}", artifact.filename),
                // already reported as a data-integrity warning
                Err(ScanError::Link { .. }) => {}
                Err(e) => error!("Scan acquisition failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let artifact = match self.transport.request_scan(request, cancel).await {
            TransportOutcome::Immediate { content_type, body } => {
                info!(
                    "Scan available immediately ({})",
                    content_type.as_deref().unwrap_or("no content type")
                );
                self.downloader.save(body, request, cancel).await?
            }
            TransportOutcome::Accepted(handle) => {
                info!("Scan requested as {}, polling for completion", handle);
                self.poller
                    .run(&handle, request, &self.downloader, cancel)
                    .await?
            }
            TransportOutcome::Failed(e) => return Err(e),
        };

        self.recorder.record(request, &artifact).await?;
        Ok(artifact)
    }

    /// Retries only the linking step for an artifact left unlinked by a
    /// [`ScanError::Link`]. Nothing is downloaded again.
    pub async fn relink(
        &self,
        request: &ScanRequest,
        artifact: &Artifact,
    ) -> Result<LinkRecord, ScanError> {
        self.recorder.record(request, artifact).await
    }
}

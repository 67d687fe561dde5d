//! # radscan_rs
//! ## Before you begin
//! This library talks to a radiology service exposing the scan acquisition API
//! (`/api/v1/get_or_request_scan`, `/api/request_status/{id}`, `/api/scans/download/{id}`).
//! The base URL of that service is configured through [ScanClientConfig], either directly or
//! from the `RADSCAN_*` environment variables (see [ScanClientConfig::from_env]).
//!
//! ## Description
//! **radscan_rs** requests a diagnostic imaging scan (CT, MR, X-RAY, ...) for a patient, waits for
//! it if the service has to produce it first, stores the resulting file and links it to the
//! patient record.
//!
//! The service answers a scan request in one of three ways:
//!
//! 1. `200` with a binary body: the scan is downloaded straight away.
//! 2. `202` with a request id: the request status is polled on a fixed cadence until the scan is
//!    ready or the polling deadline passes, then the scan is downloaded by id.
//! 3. anything else: the request fails with a [ScanError].
//!
//! Every successful acquisition produces exactly one [Artifact] in the [ArtifactStore] and
//! exactly one [LinkRecord] in the [PatientRecords] store. Both stores are traits; the crate ships
//! [FsArtifactStore], [MemoryPatientRecords] and [JsonPatientRecords].
//!
//! Acquisitions take a [CancellationToken](tokio_util::sync::CancellationToken) which aborts the
//! initial request, the polling loop and the download alike.
//!
//! ## Example
//! ```rust no_run
//! use std::sync::Arc;
//! use radscan_rs::{MemoryPatientRecords, PatientId, ScanClient, ScanClientConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! pub async fn main() {
//!     let records = Arc::new(MemoryPatientRecords::new());
//!     records.register("DERM-00007", PatientId(7)).await;
//!
//!     let config = ScanClientConfig::from_env().unwrap();
//!     let client = ScanClient::with_fs_store(config, records.clone()).unwrap();
//!
//!     match client
//!         .acquire_scan("DERM-00007", "CT", "chest", &CancellationToken::new())
//!         .await
//!     {
//!         Ok(artifact) => println!("Saved {} ({})", artifact.filename, artifact.description),
//!         Err(e) if e.is_orphaned_artifact() => eprintln!("Stored but not linked: {}", e),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```

pub mod classify;
mod client;
mod config;
pub mod download;
mod error;
mod get;
mod post;
mod records;
mod store;
mod structs;

pub use client::ScanClient;
pub use config::ScanClientConfig;
pub use download::Downloader;
pub use error::{RecordsError, ScanError, ScanErrorKind, StoreError};
pub use get::Poller;
pub use post::{Transport, TransportOutcome};
pub use records::{JsonPatientRecords, MemoryPatientRecords, PatientRecords, Recorder};
pub use store::{ArtifactStore, ByteStream, FsArtifactStore, StoredFile};
pub use structs::{Artifact, LinkRecord, PatientId, RemoteRequestHandle, ScanId, ScanRequest};

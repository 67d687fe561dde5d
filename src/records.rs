//! Patient record collaborator and the recorder that links artifacts to it.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{info, warn};

use crate::{Artifact, LinkRecord, PatientId, RecordsError, ScanError, ScanRequest};

/// The clinical record store, as seen by the scan client.
#[async_trait]
pub trait PatientRecords: Send + Sync {
    /// Maps an external patient code (UHID) to the store's internal id.
    async fn resolve_patient(&self, uhid: &str) -> Result<Option<PatientId>, RecordsError>;

    /// Appends one link record for `patient`.
    async fn attach_artifact(&self, patient: PatientId, link: &LinkRecord)
        -> Result<(), RecordsError>;
}

/// Creates exactly one [`LinkRecord`] for a stored artifact.
#[derive(Clone)]
pub struct Recorder {
    records: Arc<dyn PatientRecords>,
}

impl Recorder {
    pub fn new(records: Arc<dyn PatientRecords>) -> Self {
        Self { records }
    }

    /// Links `artifact` to the patient of `request`.
    ///
    /// On failure the artifact stays in the store; the returned
    /// [`ScanError::Link`] carries what is needed to reconcile it by hand.
    pub async fn record(
        &self,
        request: &ScanRequest,
        artifact: &Artifact,
    ) -> Result<LinkRecord, ScanError> {
        let patient_id = match self.records.resolve_patient(request.patient()).await {
            Ok(Some(id)) => id,
            Ok(None) => return Err(orphaned(request, artifact, "unknown patient".to_string())),
            Err(e) => return Err(orphaned(request, artifact, e.to_string())),
        };

        let link = LinkRecord {
            patient_id,
            uhid: request.patient().to_string(),
            filename: artifact.filename.clone(),
            description: artifact.description.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.records.attach_artifact(patient_id, &link).await {
            return Err(orphaned(request, artifact, e.to_string()));
        }

        info!(
            "Linked {} ({}) to patient {}",
            link.filename, link.description, link.uhid
        );
        Ok(link)
    }
}

fn orphaned(request: &ScanRequest, artifact: &Artifact, reason: String) -> ScanError {
    warn!(
        filename = %artifact.filename,
        path = %artifact.path.display(),
        uhid = %request.patient(),
        reason = %reason,
        "data integrity: scan stored but not linked to patient"
    );
    ScanError::Link {
        artifact: artifact.clone(),
        patient: request.patient().to_string(),
        reason,
    }
}

/// In-process patient records, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryPatientRecords {
    patients: Mutex<HashMap<String, PatientId>>,
    links: Mutex<Vec<LinkRecord>>,
}

impl MemoryPatientRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, uhid: &str, id: PatientId) {
        self.patients.lock().await.insert(uhid.to_string(), id);
    }

    pub async fn links(&self) -> Vec<LinkRecord> {
        self.links.lock().await.clone()
    }
}

#[async_trait]
impl PatientRecords for MemoryPatientRecords {
    async fn resolve_patient(&self, uhid: &str) -> Result<Option<PatientId>, RecordsError> {
        Ok(self.patients.lock().await.get(uhid).copied())
    }

    async fn attach_artifact(
        &self,
        patient: PatientId,
        link: &LinkRecord,
    ) -> Result<(), RecordsError> {
        if !self.patients.lock().await.values().any(|id| *id == patient) {
            return Err(RecordsError::UnknownPatientId(patient.0));
        }
        self.links.lock().await.push(link.clone());
        Ok(())
    }
}

/// Patient records backed by two files: a JSON roster mapping patient codes
/// to internal ids (`{"DERM-00007": 7}`), and an append-only JSON-lines
/// ledger receiving one line per link.
#[derive(Debug)]
pub struct JsonPatientRecords {
    patients: HashMap<String, PatientId>,
    ledger: PathBuf,
    append: Mutex<()>,
}

impl JsonPatientRecords {
    pub async fn open(
        roster: impl AsRef<Path>,
        ledger: impl Into<PathBuf>,
    ) -> Result<Self, RecordsError> {
        let roster = roster.as_ref();
        let raw = fs::read(roster).await.map_err(|source| RecordsError::Roster {
            path: roster.to_path_buf(),
            source,
        })?;
        let patients: HashMap<String, PatientId> = serde_json::from_slice(&raw)?;

        Ok(Self {
            patients,
            ledger: ledger.into(),
            append: Mutex::new(()),
        })
    }

    pub fn ledger(&self) -> &Path {
        &self.ledger
    }

    /// Every link in the ledger, oldest first.
    pub async fn read_ledger(&self) -> Result<Vec<LinkRecord>, RecordsError> {
        let raw = match fs::read_to_string(&self.ledger).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RecordsError::Ledger {
                    path: self.ledger.clone(),
                    source,
                })
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(RecordsError::from))
            .collect()
    }
}

#[async_trait]
impl PatientRecords for JsonPatientRecords {
    async fn resolve_patient(&self, uhid: &str) -> Result<Option<PatientId>, RecordsError> {
        Ok(self.patients.get(uhid.trim()).copied())
    }

    async fn attach_artifact(
        &self,
        patient: PatientId,
        link: &LinkRecord,
    ) -> Result<(), RecordsError> {
        if !self.patients.values().any(|id| *id == patient) {
            return Err(RecordsError::UnknownPatientId(patient.0));
        }

        let mut line = serde_json::to_vec(link)?;
        line.push(b'\n');

        let _guard = self.append.lock().await;
        if let Some(parent) = self.ledger.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(RecordsError::Append)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger)
            .await
            .map_err(RecordsError::Append)?;
        file.write_all(&line).await.map_err(RecordsError::Append)?;
        file.sync_data().await.map_err(RecordsError::Append)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact {
            filename: "scan_DERM-00007_CT_CHEST_20250829_140509.dcm".to_string(),
            path: PathBuf::from("uploads/scan_DERM-00007_CT_CHEST_20250829_140509.dcm"),
            size: 4,
            description: "CT of CHEST".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_appends_one_link() {
        let records = Arc::new(MemoryPatientRecords::new());
        records.register("DERM-00007", PatientId(7)).await;
        let recorder = Recorder::new(records.clone());
        let request = ScanRequest::new("SURGERY", "DERM-00007", "CT", "CHEST").unwrap();

        let link = recorder.record(&request, &artifact()).await.unwrap();

        assert_eq!(link.patient_id, PatientId(7));
        assert_eq!(link.description, "CT of CHEST");
        assert_eq!(records.links().await, vec![link]);
    }

    #[tokio::test]
    async fn test_record_unknown_patient_is_link_error() {
        let records = Arc::new(MemoryPatientRecords::new());
        let recorder = Recorder::new(records.clone());
        let request = ScanRequest::new("SURGERY", "NOPE-1", "CT", "CHEST").unwrap();

        let err = recorder.record(&request, &artifact()).await.unwrap_err();

        assert!(err.is_orphaned_artifact());
        match err {
            ScanError::Link {
                artifact: orphan,
                patient,
                ..
            } => {
                assert_eq!(orphan, artifact());
                assert_eq!(patient, "NOPE-1");
            }
            other => panic!("expected link error, got {:?}", other),
        }
        assert!(records.links().await.is_empty());
    }

    #[tokio::test]
    async fn test_json_records_roundtrip_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let roster = dir.path().join("patients.json");
        std::fs::write(&roster, r#"{"DERM-00007": 7, "DERM001": 1}"#).unwrap();
        let records = JsonPatientRecords::open(&roster, dir.path().join("ledger/links.jsonl"))
            .await
            .unwrap();

        assert_eq!(records.resolve_patient("DERM001").await.unwrap(), Some(PatientId(1)));
        assert_eq!(records.resolve_patient("DERM999").await.unwrap(), None);

        let recorder = Recorder::new(Arc::new(records));
        let request = ScanRequest::new("SURGERY", "DERM-00007", "CT", "CHEST").unwrap();
        recorder.record(&request, &artifact()).await.unwrap();
        recorder.record(&request, &artifact()).await.unwrap();

        let reopened = JsonPatientRecords::open(&roster, dir.path().join("ledger/links.jsonl"))
            .await
            .unwrap();
        let ledger = reopened.read_ledger().await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|l| l.uhid == "DERM-00007" && l.patient_id == PatientId(7)));
    }

    #[tokio::test]
    async fn test_json_records_rejects_malformed_roster() {
        let dir = tempfile::tempdir().unwrap();
        let roster = dir.path().join("patients.json");
        std::fs::write(&roster, "not json").unwrap();

        let result = JsonPatientRecords::open(&roster, dir.path().join("links.jsonl")).await;
        assert!(matches!(result, Err(RecordsError::Json(_))));
    }
}

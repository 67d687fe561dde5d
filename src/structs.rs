use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ScanError;

/// A single scan request for one patient, built at the start of an acquisition.
///
/// Serializes to the JSON body expected by `POST /api/v1/get_or_request_scan`.
/// Modality and region are trimmed and upper-cased, so `"ct"` / `" chest "`
/// become `"CT"` / `"CHEST"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    #[serde(rename = "department_name")]
    department: String,
    #[serde(rename = "uhid")]
    patient: String,
    #[serde(rename = "type_of_scan")]
    modality: String,
    #[serde(rename = "body_part")]
    region: String,
}

impl ScanRequest {
    /// Builds a request, rejecting any empty (or whitespace only) field.
    pub fn new(
        department: &str,
        patient: &str,
        modality: &str,
        region: &str,
    ) -> Result<Self, ScanError> {
        let patient = required("patient identifier", patient)?;
        let modality = required("modality", modality)?.to_uppercase();
        let region = required("region", region)?.to_uppercase();
        let department = required("department", department)?;

        Ok(Self {
            department,
            patient,
            modality,
            region,
        })
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    /// The external patient code (UHID).
    pub fn patient(&self) -> &str {
        &self.patient
    }

    pub fn modality(&self) -> &str {
        &self.modality
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Human-readable description stored with the link, e.g. `"CT of CHEST"`.
    pub fn description(&self) -> String {
        format!("{} of {}", self.modality, self.region)
    }
}

fn required(field: &str, value: &str) -> Result<String, ScanError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ScanError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Identifier of a request the remote service accepted with `202`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRequestHandle(pub(crate) String);

impl RemoteRequestHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteRequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a finished scan, used with the download-by-id endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanId(pub(crate) String);

impl ScanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scan payload fully written to the artifact store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub description: String,
}

/// Internal identifier the patient record store uses for a patient.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub i64);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable association between a patient and a stored artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub patient_id: PatientId,
    pub uhid: String,
    pub filename: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanErrorKind;

    #[test]
    fn test_scan_request_normalizes_case() {
        let req = ScanRequest::new("SURGERY", " DERM-00007 ", "ct", " chest ").unwrap();
        assert_eq!(req.patient(), "DERM-00007");
        assert_eq!(req.modality(), "CT");
        assert_eq!(req.region(), "CHEST");
        assert_eq!(req.description(), "CT of CHEST");
    }

    #[test]
    fn test_scan_request_rejects_blank_fields() {
        for (patient, modality, region) in [("", "CT", "CHEST"), ("P1", " ", "CHEST"), ("P1", "CT", "")] {
            let err = ScanRequest::new("SURGERY", patient, modality, region).unwrap_err();
            assert_eq!(err.kind(), ScanErrorKind::Validation);
        }
    }

    #[test]
    fn test_scan_request_wire_format() {
        let req = ScanRequest::new("Cardiology", "DERM001", "MR", "brain").unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "department_name": "Cardiology",
                "uhid": "DERM001",
                "type_of_scan": "MR",
                "body_part": "BRAIN",
            })
        );
    }
}

//! Decides what a response from `get_or_request_scan` means.
//!
//! Nothing in here performs I/O: the transport hands over the status code,
//! the content type and, when needed, the body it already read.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::{RemoteRequestHandle, ScanError, ScanId};

/// Longest body excerpt carried in an error message.
pub const BODY_EXCERPT_LIMIT: usize = 400;

/// What the initial response asks the client to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    /// `200` with a binary payload: the scan is in the body.
    Binary,
    /// `200` with a JSON payload, which the service contract does not allow.
    UnexpectedJson,
    /// `202`: the scan was requested and must be polled for.
    Accepted,
    /// Any other status.
    Rejected(StatusCode),
}

pub fn classify(status: StatusCode, content_type: Option<&str>) -> ResponseMode {
    match status {
        StatusCode::OK if content_type.is_some_and(is_json) => ResponseMode::UnexpectedJson,
        StatusCode::OK => ResponseMode::Binary,
        StatusCode::ACCEPTED => ResponseMode::Accepted,
        status => ResponseMode::Rejected(status),
    }
}

pub fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// The service has used both `request_id` and `id` for the same value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AcceptedId {
    RequestId(String),
    Id(String),
    Missing,
}

/// A JSON identifier, which the service sends either as a string or a number.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Identifier {
    Text(String),
    Number(serde_json::Number),
}

impl Identifier {
    fn into_non_empty(self) -> Option<String> {
        let value = match self {
            Identifier::Text(s) => s.trim().to_string(),
            Identifier::Number(n) => n.to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Deserialize)]
struct AcceptedBody {
    request_id: Option<Identifier>,
    id: Option<Identifier>,
}

pub(crate) fn accepted_id(body: &[u8]) -> AcceptedId {
    let Ok(body) = serde_json::from_slice::<AcceptedBody>(body) else {
        return AcceptedId::Missing;
    };
    if let Some(id) = body.request_id.and_then(Identifier::into_non_empty) {
        return AcceptedId::RequestId(id);
    }
    match body.id.and_then(Identifier::into_non_empty) {
        Some(id) => AcceptedId::Id(id),
        None => AcceptedId::Missing,
    }
}

/// Extracts the request handle from a `202` body.
pub fn decode_request_id(body: &[u8]) -> Result<RemoteRequestHandle, ScanError> {
    match accepted_id(body) {
        AcceptedId::RequestId(id) | AcceptedId::Id(id) => Ok(RemoteRequestHandle(id)),
        AcceptedId::Missing => Err(ScanError::Protocol(
            "202 accepted but no request id".to_string(),
        )),
    }
}

/// Body of `GET /api/request_status/{request_id}`.
#[derive(Deserialize, Debug, Default)]
pub struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    scan_id: Option<Identifier>,
}

impl StatusResponse {
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Returns the scan to download when `status` is one of `done` and a scan id is present.
    pub fn terminal_scan<F>(self, is_done: F) -> Option<ScanId>
    where
        F: Fn(&str) -> bool,
    {
        let status = self.status?;
        if !is_done(&status) {
            return None;
        }
        self.scan_id
            .and_then(Identifier::into_non_empty)
            .map(ScanId)
    }
}

pub fn error_summary(status: StatusCode, body: &str) -> String {
    let excerpt: String = body.chars().take(BODY_EXCERPT_LIMIT).collect();
    format!("server returned {}: {}", status.as_u16(), excerpt)
}

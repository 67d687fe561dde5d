use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ScanError;

pub const ENV_API_URL: &str = "RADSCAN_API_URL";
pub const ENV_DEPARTMENT: &str = "RADSCAN_DEPARTMENT";
pub const ENV_UPLOAD_DIR: &str = "RADSCAN_UPLOAD_DIR";
pub const ENV_POLL_INTERVAL: &str = "RADSCAN_POLL_INTERVAL_SECS";
pub const ENV_POLL_TIMEOUT: &str = "RADSCAN_POLL_TIMEOUT_SECS";

/// Settings for a [`crate::ScanClient`], resolved once and passed in at construction.
///
/// Durations are (de)serialized as seconds and may be fractional, so
/// `"poll_interval": 0.05` is a 50ms cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanClientConfig {
    /// Base URL of the radiology service, without the `/api/...` path.
    pub api_url: String,
    /// Referring department sent with every request.
    pub department: String,
    /// Directory downloaded scans are written to.
    pub upload_dir: PathBuf,
    /// Bound on waiting for the response headers of the initial request and downloads.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Bound on each individual status query.
    #[serde(with = "duration_secs")]
    pub status_timeout: Duration,
    /// Fixed delay between status queries.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Overall polling deadline, measured from the first status query.
    #[serde(with = "duration_secs")]
    pub poll_timeout: Duration,
    /// Status values (compared case-insensitively) that mean "ready for download".
    pub done_statuses: Vec<String>,
}

impl Default for ScanClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5000".to_string(),
            department: "SURGERY".to_string(),
            upload_dir: PathBuf::from("uploads"),
            request_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(300),
            done_statuses: vec!["attended".to_string(), "completed".to_string()],
        }
    }
}

impl ScanClientConfig {
    /// Default configuration with overrides from the `RADSCAN_*` environment variables.
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }
        if let Some(department) = lookup(ENV_DEPARTMENT) {
            config.department = department;
        }
        if let Some(dir) = lookup(ENV_UPLOAD_DIR) {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_POLL_INTERVAL) {
            config.poll_interval = parse_secs(ENV_POLL_INTERVAL, &secs)?;
        }
        if let Some(secs) = lookup(ENV_POLL_TIMEOUT) {
            config.poll_timeout = parse_secs(ENV_POLL_TIMEOUT, &secs)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// Checks the values a client cannot run without.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.api_url.trim().is_empty() {
            return Err(ScanError::Validation("api_url cannot be empty".into()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ScanError::Validation(format!(
                "api_url must be an http(s) URL, got {}",
                self.api_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ScanError::Validation("poll_interval must be positive".into()));
        }
        if self.done_statuses.is_empty() {
            return Err(ScanError::Validation("done_statuses cannot be empty".into()));
        }
        Ok(())
    }

    /// Joins an `/api/...` path onto the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    pub(crate) fn is_done_status(&self, status: &str) -> bool {
        self.done_statuses
            .iter()
            .any(|done| done.eq_ignore_ascii_case(status.trim()))
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ScanError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ScanError::Validation(format!("{} must be a number of seconds, got {:?}", key, value)))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ScanClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.poll_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
        assert!(config.is_done_status("ATTENDED"));
        assert!(config.is_done_status("Completed"));
        assert!(!config.is_done_status("pending"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://radiology.local:8080/"),
            (ENV_POLL_INTERVAL, "0.5"),
            (ENV_POLL_TIMEOUT, "10"),
        ]);
        let config =
            ScanClientConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.poll_timeout, Duration::from_secs(10));
        assert_eq!(
            config.endpoint("/api/request_status/r-1"),
            "http://radiology.local:8080/api/request_status/r-1"
        );
        assert_eq!(config.department, "SURGERY");
    }

    #[test]
    fn test_from_lookup_rejects_bad_interval() {
        let result = ScanClientConfig::from_lookup(|key| {
            (key == ENV_POLL_INTERVAL).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ScanError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = ScanClientConfig::default().with_api_url("ftp://pacs");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_fractional_seconds() {
        let config: ScanClientConfig =
            serde_json::from_str(r#"{"poll_interval": 0.05, "poll_timeout": 2}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}

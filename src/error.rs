use thiserror::Error;

/// Failures raised by the reporting pipeline. None of these are allowed to
/// fail the test run; callers log them and move on.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("malformed document state: {0}")]
    MalformedDocument(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Delivery(err.to_string())
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

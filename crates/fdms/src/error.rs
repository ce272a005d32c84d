//! The error taxonomy of the service.
//!
//! Domain errors are enumerated conditions visible to the client: they
//! carry an error code and an HTTP status, are never logged as faults
//! and serialize into the protocol envelope. Technical faults (storage,
//! signing, malformed stored data) surface as 5xx with no code.
//! Validation results are neither; they ride on the receipt record.

use serde::Serialize;
use thiserror::Error;

use fdms_core::{CoreError, ErrorCode};
use fdms_pki::PkiError;
use fdms_store::StoreError;

/// A client-visible, enumerated rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    pub status: u16,
    pub title: String,
    pub code: Option<ErrorCode>,
    pub detail: Option<String>,
}

impl DomainError {
    /// A 422 rejection with a protocol error code.
    pub fn unprocessable(code: ErrorCode, title: impl Into<String>) -> Self {
        Self {
            status: 422,
            title: title.into(),
            code: Some(code),
            detail: None,
        }
    }

    /// A 401 rejection; unauthenticated requests carry no code.
    pub fn unauthorized(title: impl Into<String>) -> Self {
        Self {
            status: 401,
            title: title.into(),
            code: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The wire envelope for this rejection.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_type: "about:blank",
            title: self.title.clone(),
            status: self.status,
            error_code: self.code.map(|c| c.as_str().to_string()),
            detail: self.detail.clone(),
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code})", self.title),
            None => f.write_str(&self.title),
        }
    }
}

/// The JSON error body returned to devices.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub title: String,
    pub status: u16,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything an operation can fail with.
#[derive(Debug, Error)]
pub enum FdmsError {
    /// An enumerated client-visible rejection.
    #[error("{0}")]
    Domain(DomainError),

    /// Persistence fault.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Key or certificate fault outside the enumerated rejections.
    #[error("pki: {0}")]
    Pki(#[from] PkiError),

    /// Core computation fault on data that passed validation.
    #[error("core: {0}")]
    Core(#[from] CoreError),
}

impl FdmsError {
    pub fn domain(code: ErrorCode, title: impl Into<String>) -> Self {
        Self::Domain(DomainError::unprocessable(code, title))
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status to respond with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Domain(e) => e.status,
            _ => 500,
        }
    }
}

impl From<DomainError> for FdmsError {
    fn from(e: DomainError) -> Self {
        Self::Domain(e)
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, FdmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let err = DomainError::unprocessable(ErrorCode::Fisc04, "Counters do not match")
            .with_detail("counter-mismatch");
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["type"], "about:blank");
        assert_eq!(json["status"], 422);
        assert_eq!(json["errorCode"], "FISC04");
        assert_eq!(json["detail"], "counter-mismatch");
    }

    #[test]
    fn unauthorized_has_no_code() {
        let err = DomainError::unauthorized("Certificate not recognized");
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["status"], 401);
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn technical_faults_are_500() {
        let err = FdmsError::Store(StoreError::NotFound("x".into()));
        assert_eq!(err.status(), 500);
        assert!(err.as_domain().is_none());
    }
}

//! Error types for the PKI module.

use thiserror::Error;

/// Errors that can occur in certificate and signing operations.
#[derive(Debug, Error)]
pub enum PkiError {
    /// The CSR could not be parsed or its signature does not verify.
    #[error("invalid certificate request: {0}")]
    InvalidCsr(String),

    /// The CSR subject does not carry the expected device identity.
    #[error("CSR common name mismatch: expected {expected}, got {got}")]
    CnMismatch { expected: String, got: String },

    /// The CA key or certificate is unusable.
    #[error("certificate authority unavailable: {0}")]
    CaUnavailable(String),

    /// A stored or presented certificate could not be parsed.
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    /// The requested thumbprint does not match the server certificate.
    #[error("thumbprint mismatch")]
    ThumbprintMismatch,

    /// The server signing key is unusable.
    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),

    /// Signature verification failed.
    #[error("bad signature")]
    BadSignature,

    /// The key algorithm is neither RSA nor P-256.
    #[error("unsupported key type")]
    UnsupportedKey,
}

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, PkiError>;

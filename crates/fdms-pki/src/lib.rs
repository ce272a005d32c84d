//! # FDMS PKI
//!
//! Key material and X.509 handling for the fiscal device management
//! service: CSR validation, CA-signed device certificate issuance,
//! SHA-1 thumbprints, the server signing key and device-signature
//! verification.
//!
//! Signatures are RSA-2048 PKCS#1 v1.5 or ECDSA P-256 (ASN.1 DER), both
//! over SHA-256 digests. Thumbprints are always SHA-1 of the DER
//! encoding of the full certificate.

pub mod ca;
pub mod chain;
pub mod error;
pub mod signer;

pub use ca::{build_csr, CertificateAuthority, CsrPolicy, IssuedCertificate};
pub use chain::ServerChain;
pub use error::{PkiError, Result};
pub use signer::{DeviceVerifier, ServerSigner};

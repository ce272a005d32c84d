//! The server signing key and device-signature verification.
//!
//! Both key families the protocol admits are supported: RSA-2048 with
//! PKCS#1 v1.5 padding and ECDSA P-256 with ASN.1 DER signatures. All
//! digests are SHA-256. Signing is deterministic (PKCS#1 v1.5, RFC 6979),
//! so the signer is re-entrant and holds no mutable state.

use p256::ecdsa as p256_ecdsa;
use p256::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use rsa::pkcs8::DecodePrivateKey as _;
use rsa::signature::{SignatureEncoding as _, Signer as _, Verifier as _};
use sha2::Sha256;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer as _;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::error::{PkiError, Result};

/// The FDMS signing key, read-only after init and shared across requests.
pub enum ServerSigner {
    EcdsaP256(p256_ecdsa::SigningKey),
    RsaPkcs1(rsa::pkcs1v15::SigningKey<Sha256>),
}

impl ServerSigner {
    /// Load from a PKCS#8 PEM private key, accepting either key family.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = p256_ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self::EcdsaP256(key));
        }
        if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::RsaPkcs1(rsa::pkcs1v15::SigningKey::new(key)));
        }
        Err(PkiError::SigningUnavailable(
            "private key is neither P-256 nor RSA PKCS#8".into(),
        ))
    }

    /// Sign a message. The digest happens inside; callers pass the raw
    /// canonical bytes or counter-signature input.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::EcdsaP256(key) => {
                let signature: p256_ecdsa::DerSignature = key.sign(message);
                signature.to_vec()
            }
            Self::RsaPkcs1(key) => {
                let signature: rsa::pkcs1v15::Signature = key.sign(message);
                signature.to_vec()
            }
        }
    }
}

impl std::fmt::Debug for ServerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EcdsaP256(_) => f.write_str("ServerSigner::EcdsaP256"),
            Self::RsaPkcs1(_) => f.write_str("ServerSigner::RsaPkcs1"),
        }
    }
}

/// A device's public key, extracted from its certificate, used to verify
/// receipt and fiscal-day signatures.
pub enum DeviceVerifier {
    EcdsaP256(p256_ecdsa::VerifyingKey),
    RsaPkcs1(rsa::pkcs1v15::VerifyingKey<Sha256>),
}

impl DeviceVerifier {
    /// Extract the public key from a PEM-encoded certificate.
    pub fn from_cert_pem(pem: &str) -> Result<Self> {
        let (_, parsed) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| PkiError::MalformedCertificate(e.to_string()))?;
        let cert = parsed
            .parse_x509()
            .map_err(|e| PkiError::MalformedCertificate(e.to_string()))?;
        Self::from_spki_der(cert.public_key().raw)
    }

    /// Build from a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(spki: &[u8]) -> Result<Self> {
        // Reject garbage early with a parse-level error.
        SubjectPublicKeyInfo::from_der(spki)
            .map_err(|e| PkiError::MalformedCertificate(e.to_string()))?;

        if let Ok(key) = p256_ecdsa::VerifyingKey::from_public_key_der(spki) {
            return Ok(Self::EcdsaP256(key));
        }
        if let Ok(key) = rsa::RsaPublicKey::from_public_key_der(spki) {
            return Ok(Self::RsaPkcs1(rsa::pkcs1v15::VerifyingKey::new(key)));
        }
        Err(PkiError::UnsupportedKey)
    }

    /// Verify a signature over a message (SHA-256 digested internally).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            Self::EcdsaP256(key) => {
                let signature = p256_ecdsa::Signature::from_der(signature)
                    .map_err(|_| PkiError::BadSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| PkiError::BadSignature)
            }
            Self::RsaPkcs1(key) => {
                let signature = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| PkiError::BadSignature)?;
                key.verify(message, &signature)
                    .map_err(|_| PkiError::BadSignature)
            }
        }
    }
}

impl std::fmt::Debug for DeviceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EcdsaP256(_) => f.write_str("DeviceVerifier::EcdsaP256"),
            Self::RsaPkcs1(_) => f.write_str("DeviceVerifier::RsaPkcs1"),
        }
    }
}

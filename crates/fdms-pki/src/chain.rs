//! The server certificate chain handed to devices.

use chrono::{DateTime, NaiveDateTime};
use x509_parser::pem::parse_x509_pem;

use fdms_core::Thumbprint;

use crate::error::{PkiError, Result};

/// The server's own certificate plus its issuing CA, served to devices
/// over the anonymous endpoint so they can pin the FDMS identity.
#[derive(Debug, Clone)]
pub struct ServerChain {
    server_pem: String,
    ca_pem: String,
    thumbprint: Thumbprint,
    valid_till: NaiveDateTime,
}

impl ServerChain {
    /// Build from the PEM server certificate and CA certificate.
    pub fn new(server_pem: String, ca_pem: String) -> Result<Self> {
        let (_, parsed) = parse_x509_pem(server_pem.as_bytes())
            .map_err(|e| PkiError::MalformedCertificate(e.to_string()))?;
        let cert = parsed
            .parse_x509()
            .map_err(|e| PkiError::MalformedCertificate(e.to_string()))?;

        let thumbprint = Thumbprint::of_der(&parsed.contents);
        let valid_till = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| PkiError::MalformedCertificate("not_after out of range".into()))?
            .naive_utc();

        Ok(Self {
            server_pem,
            ca_pem,
            thumbprint,
            valid_till,
        })
    }

    /// Thumbprint of the server certificate.
    pub fn thumbprint(&self) -> Thumbprint {
        self.thumbprint
    }

    /// When the server certificate expires.
    pub fn valid_till(&self) -> NaiveDateTime {
        self.valid_till
    }

    /// The chain as PEM strings, leaf first. A caller-supplied
    /// thumbprint must match the leaf.
    pub fn get(&self, expected: Option<Thumbprint>) -> Result<(Vec<String>, NaiveDateTime)> {
        if let Some(expected) = expected {
            if expected != self.thumbprint {
                return Err(PkiError::ThumbprintMismatch);
            }
        }
        Ok((
            vec![self.server_pem.clone(), self.ca_pem.clone()],
            self.valid_till,
        ))
    }
}

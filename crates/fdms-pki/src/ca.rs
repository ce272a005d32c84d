//! CSR policy and device certificate issuance.
//!
//! The FDMS CA signs device CSRs whose subject proves the device
//! identity: the common name must equal `{prefix}-{serialNo}-{deviceID}`
//! with the device id zero-padded to ten digits. Country and
//! organization, when present, must match the configured jurisdiction.

use chrono::{Duration, NaiveDateTime};
use rand::RngCore;
use rcgen::{
    Certificate, CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};

use fdms_core::Thumbprint;

use crate::error::{PkiError, Result};

/// Subject policy applied to every CSR.
#[derive(Debug, Clone)]
pub struct CsrPolicy {
    /// Prefix of the identity common name.
    pub cn_prefix: String,
    /// Expected ISO country code, checked when the CSR carries one.
    pub country: Option<String>,
    /// Expected organization, checked when the CSR carries one.
    pub organization: Option<String>,
}

impl CsrPolicy {
    /// The deterministic identity string a device must put in its CN.
    pub fn expected_cn(&self, serial_no: &str, device_id: u32) -> String {
        format!("{}-{}-{:010}", self.cn_prefix, serial_no, device_id)
    }
}

/// A freshly issued device certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub pem: String,
    pub der: Vec<u8>,
    pub thumbprint: Thumbprint,
    pub valid_till: NaiveDateTime,
}

/// The FDMS certificate authority. Key material is read-only after init.
pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    policy: CsrPolicy,
    validity_days: i64,
}

impl CertificateAuthority {
    /// Reconstruct the CA from PEM material loaded at startup.
    pub fn from_pem(ca_cert_pem: &str, ca_key_pem: &str, policy: CsrPolicy, validity_days: i64) -> Result<Self> {
        let key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| PkiError::CaUnavailable(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
            .map_err(|e| PkiError::CaUnavailable(e.to_string()))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| PkiError::CaUnavailable(e.to_string()))?;
        Ok(Self {
            cert,
            key,
            policy,
            validity_days,
        })
    }

    /// Generate a fresh CA. Used for tests and development setups.
    pub fn generate(common_name: &str, policy: CsrPolicy, validity_days: i64) -> Result<Self> {
        let key = KeyPair::generate().map_err(|e| PkiError::CaUnavailable(e.to_string()))?;
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params
            .self_signed(&key)
            .map_err(|e| PkiError::CaUnavailable(e.to_string()))?;
        Ok(Self {
            cert,
            key,
            policy,
            validity_days,
        })
    }

    /// The CA certificate, PEM-encoded.
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// The subject policy in force.
    pub fn policy(&self) -> &CsrPolicy {
        &self.policy
    }

    /// Validate a CSR and issue a client-auth certificate for a device.
    ///
    /// The CSR signature is verified during parsing; the subject is then
    /// checked against the policy, and the certificate is signed with a
    /// fresh 128-bit serial, `notBefore = now` and the configured
    /// validity.
    pub fn issue(
        &self,
        csr_pem: &str,
        device_id: u32,
        serial_no: &str,
        now: NaiveDateTime,
    ) -> Result<IssuedCertificate> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| PkiError::InvalidCsr(e.to_string()))?;

        self.check_subject(&csr.params.distinguished_name, device_id, serial_no)?;

        let mut serial = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial);
        serial[0] &= 0x7f;
        csr.params.serial_number = Some(SerialNumber::from(serial.to_vec()));

        let not_before = to_offset(now)?;
        let valid_till = now + Duration::days(self.validity_days);
        csr.params.not_before = not_before;
        csr.params.not_after = to_offset(valid_till)?;
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let cert = csr
            .signed_by(&self.cert, &self.key)
            .map_err(|e| PkiError::InvalidCsr(e.to_string()))?;

        let der = cert.der().to_vec();
        Ok(IssuedCertificate {
            pem: cert.pem(),
            thumbprint: Thumbprint::of_der(&der),
            der,
            valid_till,
        })
    }

    fn check_subject(
        &self,
        dn: &DistinguishedName,
        device_id: u32,
        serial_no: &str,
    ) -> Result<()> {
        let expected = self.policy.expected_cn(serial_no, device_id);
        let got = dn_string(dn, DnType::CommonName).unwrap_or_default();
        if got != expected {
            return Err(PkiError::CnMismatch { expected, got });
        }

        if let (Some(expected), Some(got)) = (
            self.policy.country.as_deref(),
            dn_string(dn, DnType::CountryName),
        ) {
            if got != expected {
                return Err(PkiError::InvalidCsr(format!(
                    "country must be {expected}, got {got}"
                )));
            }
        }

        if let (Some(expected), Some(got)) = (
            self.policy.organization.as_deref(),
            dn_string(dn, DnType::OrganizationName),
        ) {
            if got != expected {
                return Err(PkiError::InvalidCsr(format!(
                    "organization must be {expected}, got {got}"
                )));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("policy", &self.policy)
            .field("validity_days", &self.validity_days)
            .finish_non_exhaustive()
    }
}

fn dn_string(dn: &DistinguishedName, ty: DnType) -> Option<String> {
    match dn.get(&ty)? {
        DnValue::Utf8String(s) => Some(s.clone()),
        DnValue::PrintableString(s) => Some(s.as_str().to_string()),
        DnValue::Ia5String(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn to_offset(ts: NaiveDateTime) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(ts.and_utc().timestamp())
        .map_err(|e| PkiError::CaUnavailable(e.to_string()))
}

/// Build a CSR for a device identity. Devices do this on their side; the
/// server only needs it in tests and provisioning tools.
pub fn build_csr(key: &KeyPair, common_name: &str) -> Result<String> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let csr = params
        .serialize_request(key)
        .map_err(|e| PkiError::InvalidCsr(e.to_string()))?;
    csr.pem().map_err(|e| PkiError::InvalidCsr(e.to_string()))
}

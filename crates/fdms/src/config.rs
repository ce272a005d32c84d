//! Service configuration.
//!
//! Loaded once at startup and immutable afterwards. Per-taxpayer limits
//! (day length, notification window, QR base) live on the taxpayer row,
//! not here.

use serde::Deserialize;

/// A blacklisted device model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub version: String,
}

/// Configuration consumed by the core operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FdmsConfig {
    /// Accepted receipt currencies.
    pub currency_whitelist: Vec<String>,
    /// Prefix of the CSR identity common name.
    pub csr_cn_prefix: String,
    /// Expected CSR country, when the CSR carries one.
    pub csr_country: Option<String>,
    /// Expected CSR organization, when the CSR carries one.
    pub csr_organization: Option<String>,
    /// Device certificate lifetime in days.
    pub certificate_validity_days: i64,
    /// Device models rejected at verification and registration.
    pub model_blacklist: Vec<ModelRef>,
    /// Heartbeat interval handed out on Ping, in minutes.
    pub reporting_frequency_minutes: u32,
}

impl Default for FdmsConfig {
    fn default() -> Self {
        Self {
            currency_whitelist: ["USD", "ZWL", "EUR", "GBP", "ZAR"]
                .map(String::from)
                .to_vec(),
            csr_cn_prefix: "FDMS".into(),
            csr_country: Some("ZW".into()),
            csr_organization: None,
            certificate_validity_days: 365,
            model_blacklist: Vec::new(),
            reporting_frequency_minutes: 5,
        }
    }
}

impl FdmsConfig {
    /// Whether a device model is blacklisted.
    pub fn is_blacklisted(&self, model_name: &str, model_version: &str) -> bool {
        self.model_blacklist
            .iter()
            .any(|m| m.name == model_name && m.version == model_version)
    }

    /// The CSR subject policy derived from this configuration.
    pub fn csr_policy(&self) -> fdms_pki::CsrPolicy {
        fdms_pki::CsrPolicy {
            cn_prefix: self.csr_cn_prefix.clone(),
            country: self.csr_country.clone(),
            organization: self.csr_organization.clone(),
        }
    }
}

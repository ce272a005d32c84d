//! Taxpayers and fiscal devices.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::crypto::Thumbprint;
use crate::types::{DeviceStatus, OperatingMode, TaxpayerStatus};

/// A registered taxpayer. Owner of one or more fiscal devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxpayer {
    pub id: i64,
    /// 10-character taxpayer identification number. Unique.
    pub tin: String,
    pub name: String,
    /// Present iff the taxpayer is VAT-registered.
    pub vat_number: Option<String>,
    pub status: TaxpayerStatus,
    /// Maximum fiscal day length in hours.
    pub day_max_hours: i64,
    /// Hours before day end at which the device should warn the operator.
    pub day_end_notification_hours: i64,
    /// Base URL for receipt verification QR strings.
    pub qr_url_base: String,
}

impl Taxpayer {
    pub fn is_vat_registered(&self) -> bool {
        self.vat_number.is_some()
    }
}

/// A physical address of a branch or buyer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub province: String,
    pub city: String,
    pub street: String,
    pub house_no: String,
}

/// Contact details of a branch or buyer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The branch a device is installed at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: String,
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Contacts>,
}

/// A fiscal device row. The certificate columns rotate; the row persists
/// for the device's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    /// Positive 32-bit id, globally unique, assigned at provisioning.
    pub device_id: u32,
    pub taxpayer_id: i64,
    /// At most 20 characters.
    pub serial_no: String,
    pub model_name: String,
    pub model_version: String,
    /// 8-character secret bootstrapping the first certificate.
    /// Compared case-insensitively.
    pub activation_key: String,
    pub status: DeviceStatus,
    pub operating_mode: OperatingMode,
    /// Current certificate, PEM-encoded. Absent before registration.
    pub certificate_pem: Option<String>,
    /// SHA-1 thumbprint of the current certificate. Unique across devices.
    pub certificate_thumbprint: Option<Thumbprint>,
    pub certificate_valid_till: Option<NaiveDateTime>,
    pub branch: Branch,
    pub last_ping: Option<NaiveDateTime>,
}

impl Device {
    /// Case-insensitive activation-key comparison.
    pub fn activation_key_matches(&self, candidate: &str) -> bool {
        self.activation_key.eq_ignore_ascii_case(candidate)
    }
}

//! Persisted-row types.
//!
//! The wire DTO, the validated record and the persisted row are distinct:
//! this module holds the rows, which add the server-assigned columns to
//! the core records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use fdms_core::{Receipt, ServerSignature, Sha256Hash, Thumbprint, ValidationColor};

/// A receipt as stored: the validated record plus server-side columns.
/// Immutable once the server signature is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReceipt {
    /// Row id.
    pub id: i64,
    /// Server-assigned monotonic receipt id.
    #[serde(rename = "receiptID")]
    pub server_receipt_id: i64,
    /// Operation id issued when the receipt was first accepted; replays
    /// of the same submission return it unchanged.
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub fiscal_day_id: i64,
    pub taxpayer_id: i64,
    /// The validated receipt record.
    pub receipt: Receipt,
    /// Chain hash over the canonical encoding.
    pub receipt_hash: Sha256Hash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_signature: Option<ServerSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_color: Option<ValidationColor>,
    pub validation_errors: Vec<String>,
}

/// One entry of the certificate history of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub device_id: u32,
    pub certificate_pem: String,
    pub thumbprint: Thumbprint,
    pub valid_till: NaiveDateTime,
    pub issued_at: NaiveDateTime,
}

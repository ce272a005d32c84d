//! Store trait: the abstract interface for fiscal persistence.
//!
//! This trait is the only place the core meets a database. The SQLite
//! backend is the primary implementation; the in-memory backend serves
//! tests.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use fdms_core::{Device, FiscalCounter, FiscalDay, Tax, Taxpayer, Thumbprint};

use crate::error::Result;
use crate::record::{CertificateRecord, StoredReceipt};

/// The persistence port.
///
/// Mutating operations that touch several rows (receipt insert, device
/// certificate rotation) are atomic inside the backend. Operations for a
/// single device are serialized by the backend, which is what the
/// counter invariants need; distinct devices proceed in parallel.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────
    // Taxpayers and taxes
    // ─────────────────────────────────────────────────────────────────

    /// Insert a taxpayer, returning its row id.
    async fn insert_taxpayer(&self, taxpayer: &Taxpayer) -> Result<i64>;

    async fn get_taxpayer(&self, id: i64) -> Result<Option<Taxpayer>>;

    async fn insert_tax(&self, tax: &Tax) -> Result<()>;

    /// The full tax table, used for GetConfig and validation.
    async fn list_taxes(&self) -> Result<Vec<Tax>>;

    // ─────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────

    /// Insert a device, returning its row id.
    async fn insert_device(&self, device: &Device) -> Result<i64>;

    async fn get_device(&self, device_id: u32) -> Result<Option<Device>>;

    /// Resolve a device by its current certificate thumbprint.
    async fn get_device_by_thumbprint(&self, thumbprint: &Thumbprint)
        -> Result<Option<Device>>;

    /// Rotate the certificate columns and append a history row, in one
    /// transaction.
    async fn update_device_certificate(
        &self,
        device_id: u32,
        certificate_pem: &str,
        thumbprint: Thumbprint,
        valid_till: NaiveDateTime,
        issued_at: NaiveDateTime,
    ) -> Result<()>;

    async fn certificate_history(&self, device_id: u32) -> Result<Vec<CertificateRecord>>;

    async fn update_last_ping(&self, device_id: u32, at: NaiveDateTime) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────
    // Fiscal days
    // ─────────────────────────────────────────────────────────────────

    /// Insert a fiscal day, returning its row id.
    async fn insert_fiscal_day(&self, day: &FiscalDay) -> Result<i64>;

    /// The device's latest fiscal day by day number, whatever its state.
    async fn current_fiscal_day(&self, device_id: u32) -> Result<Option<FiscalDay>>;

    /// Persist the mutable columns of a fiscal day.
    async fn update_fiscal_day(&self, day: &FiscalDay) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────
    // Receipts
    // ─────────────────────────────────────────────────────────────────

    /// Reserve the next server receipt id. Monotonic, not gapless.
    async fn reserve_server_receipt_id(&self) -> Result<i64>;

    /// Insert a receipt with its lines, taxes and payments, and advance
    /// the fiscal-day cursor. One transaction; rolls back together.
    async fn insert_receipt(&self, receipt: &StoredReceipt) -> Result<i64>;

    /// Look up by the dedup key (deviceID, receiptGlobalNo).
    async fn get_receipt_by_global_no(
        &self,
        device_id: u32,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>>;

    /// Look up a chain predecessor within a fiscal day.
    async fn get_receipt_in_day(
        &self,
        device_id: u32,
        fiscal_day_id: i64,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>>;

    /// Look up by the server-assigned receipt id.
    async fn get_receipt_by_server_id(&self, server_receipt_id: i64)
        -> Result<Option<StoredReceipt>>;

    /// All receipts of a day, ordered by global number.
    async fn receipts_for_day(&self, fiscal_day_id: i64) -> Result<Vec<StoredReceipt>>;

    /// Receipts of a day whose color blocks closing (Red or Grey).
    async fn blocking_receipts_for_day(&self, fiscal_day_id: i64)
        -> Result<Vec<StoredReceipt>>;

    /// Credit notes and debit notes referencing an original receipt.
    async fn notes_for_original(
        &self,
        original_server_receipt_id: i64,
    ) -> Result<(Vec<StoredReceipt>, Vec<StoredReceipt>)>;

    // ─────────────────────────────────────────────────────────────────
    // Fiscal counters
    // ─────────────────────────────────────────────────────────────────

    /// Replace the persisted counters of a day. Zero-valued counters are
    /// skipped.
    async fn insert_counters(&self, fiscal_day_id: i64, counters: &[FiscalCounter])
        -> Result<()>;

    async fn counters_for_day(&self, fiscal_day_id: i64) -> Result<Vec<FiscalCounter>>;
}

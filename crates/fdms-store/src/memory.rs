//! In-memory implementation of the Store trait.
//!
//! Primarily for testing. Same semantics as the SQLite backend, held in
//! maps behind an RwLock, with nothing persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use fdms_core::{
    Device, FiscalCounter, FiscalDay, ReceiptType, Tax, Taxpayer, Thumbprint, ValidationColor,
};

use crate::error::{Result, StoreError};
use crate::record::{CertificateRecord, StoredReceipt};
use crate::traits::Store;

/// In-memory store. Thread-safe via RwLock; all data is lost on drop.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    server_receipt_seq: AtomicI64,
}

#[derive(Default)]
struct MemoryStoreInner {
    taxpayers: HashMap<i64, Taxpayer>,
    taxes: Vec<Tax>,
    devices: HashMap<u32, Device>,
    certificate_history: Vec<CertificateRecord>,
    fiscal_days: HashMap<i64, FiscalDay>,
    receipts: HashMap<i64, StoredReceipt>,
    next_taxpayer_id: i64,
    next_device_rowid: i64,
    next_day_id: i64,
    next_receipt_rowid: i64,
    counters: HashMap<i64, Vec<FiscalCounter>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            server_receipt_seq: AtomicI64::new(0),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_taxpayer(&self, taxpayer: &Taxpayer) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.taxpayers.values().any(|t| t.tin == taxpayer.tin) {
            return Err(StoreError::Conflict(format!("tin {}", taxpayer.tin)));
        }
        inner.next_taxpayer_id += 1;
        let id = inner.next_taxpayer_id;
        let mut taxpayer = taxpayer.clone();
        taxpayer.id = id;
        inner.taxpayers.insert(id, taxpayer);
        Ok(id)
    }

    async fn get_taxpayer(&self, id: i64) -> Result<Option<Taxpayer>> {
        Ok(self.read()?.taxpayers.get(&id).cloned())
    }

    async fn insert_tax(&self, tax: &Tax) -> Result<()> {
        self.write()?.taxes.push(tax.clone());
        Ok(())
    }

    async fn list_taxes(&self) -> Result<Vec<Tax>> {
        let mut taxes = self.read()?.taxes.clone();
        taxes.sort_by_key(|t| t.tax_id);
        Ok(taxes)
    }

    async fn insert_device(&self, device: &Device) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.devices.contains_key(&device.device_id) {
            return Err(StoreError::Conflict(format!("device {}", device.device_id)));
        }
        inner.next_device_rowid += 1;
        let rowid = inner.next_device_rowid;
        let mut device = device.clone();
        device.id = rowid;
        inner.devices.insert(device.device_id, device);
        Ok(rowid)
    }

    async fn get_device(&self, device_id: u32) -> Result<Option<Device>> {
        Ok(self.read()?.devices.get(&device_id).cloned())
    }

    async fn get_device_by_thumbprint(
        &self,
        thumbprint: &Thumbprint,
    ) -> Result<Option<Device>> {
        Ok(self
            .read()?
            .devices
            .values()
            .find(|d| d.certificate_thumbprint.as_ref() == Some(thumbprint))
            .cloned())
    }

    async fn update_device_certificate(
        &self,
        device_id: u32,
        certificate_pem: &str,
        thumbprint: Thumbprint,
        valid_till: NaiveDateTime,
        issued_at: NaiveDateTime,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner
            .devices
            .values()
            .any(|d| d.device_id != device_id && d.certificate_thumbprint == Some(thumbprint))
        {
            return Err(StoreError::Conflict("thumbprint already in use".into()));
        }
        let device = inner
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
        device.certificate_pem = Some(certificate_pem.to_string());
        device.certificate_thumbprint = Some(thumbprint);
        device.certificate_valid_till = Some(valid_till);
        inner.certificate_history.push(CertificateRecord {
            device_id,
            certificate_pem: certificate_pem.to_string(),
            thumbprint,
            valid_till,
            issued_at,
        });
        Ok(())
    }

    async fn certificate_history(&self, device_id: u32) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .read()?
            .certificate_history
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn update_last_ping(&self, device_id: u32, at: NaiveDateTime) -> Result<()> {
        let mut inner = self.write()?;
        let device = inner
            .devices
            .get_mut(&device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
        device.last_ping = Some(at);
        Ok(())
    }

    async fn insert_fiscal_day(&self, day: &FiscalDay) -> Result<i64> {
        let mut inner = self.write()?;
        if inner
            .fiscal_days
            .values()
            .any(|d| d.device_id == day.device_id && d.day_no == day.day_no)
        {
            return Err(StoreError::Conflict(format!(
                "day {} for device {}",
                day.day_no, day.device_id
            )));
        }
        inner.next_day_id += 1;
        let id = inner.next_day_id;
        let mut day = day.clone();
        day.id = id;
        inner.fiscal_days.insert(id, day);
        Ok(id)
    }

    async fn current_fiscal_day(&self, device_id: u32) -> Result<Option<FiscalDay>> {
        Ok(self
            .read()?
            .fiscal_days
            .values()
            .filter(|d| d.device_id == device_id)
            .max_by_key(|d| d.day_no)
            .cloned())
    }

    async fn update_fiscal_day(&self, day: &FiscalDay) -> Result<()> {
        let mut inner = self.write()?;
        let slot = inner
            .fiscal_days
            .get_mut(&day.id)
            .ok_or_else(|| StoreError::NotFound(format!("fiscal day {}", day.id)))?;
        *slot = day.clone();
        Ok(())
    }

    async fn reserve_server_receipt_id(&self) -> Result<i64> {
        Ok(self.server_receipt_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_receipt(&self, receipt: &StoredReceipt) -> Result<i64> {
        let mut inner = self.write()?;
        let r = &receipt.receipt;

        if inner.receipts.values().any(|s| {
            s.receipt.device_id == r.device_id
                && s.receipt.receipt_global_no == r.receipt_global_no
        }) {
            return Err(StoreError::Conflict(format!(
                "receipt {} for device {}",
                r.receipt_global_no, r.device_id
            )));
        }
        if inner.receipts.values().any(|s| {
            s.taxpayer_id == receipt.taxpayer_id && s.receipt.invoice_no == r.invoice_no
        }) {
            return Err(StoreError::Conflict(format!("invoice {}", r.invoice_no)));
        }

        inner.next_receipt_rowid += 1;
        let rowid = inner.next_receipt_rowid;
        let mut stored = receipt.clone();
        stored.id = rowid;
        let day_id = stored.fiscal_day_id;
        let global_no = r.receipt_global_no;
        inner.receipts.insert(rowid, stored);

        // Advance the day cursor; a CloseFailed day reopens.
        if let Some(day) = inner.fiscal_days.get_mut(&day_id) {
            day.last_receipt_global_no = Some(global_no);
            if day.status == fdms_core::FiscalDayStatus::FiscalDayCloseFailed {
                day.status = fdms_core::FiscalDayStatus::FiscalDayOpened;
                day.closing_error_code = None;
            }
        }
        Ok(rowid)
    }

    async fn get_receipt_by_global_no(
        &self,
        device_id: u32,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>> {
        Ok(self
            .read()?
            .receipts
            .values()
            .find(|s| {
                s.receipt.device_id == device_id
                    && s.receipt.receipt_global_no == receipt_global_no
            })
            .cloned())
    }

    async fn get_receipt_in_day(
        &self,
        device_id: u32,
        fiscal_day_id: i64,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>> {
        Ok(self
            .read()?
            .receipts
            .values()
            .find(|s| {
                s.receipt.device_id == device_id
                    && s.fiscal_day_id == fiscal_day_id
                    && s.receipt.receipt_global_no == receipt_global_no
            })
            .cloned())
    }

    async fn get_receipt_by_server_id(
        &self,
        server_receipt_id: i64,
    ) -> Result<Option<StoredReceipt>> {
        Ok(self
            .read()?
            .receipts
            .values()
            .find(|s| s.server_receipt_id == server_receipt_id)
            .cloned())
    }

    async fn receipts_for_day(&self, fiscal_day_id: i64) -> Result<Vec<StoredReceipt>> {
        let mut receipts: Vec<StoredReceipt> = self
            .read()?
            .receipts
            .values()
            .filter(|s| s.fiscal_day_id == fiscal_day_id)
            .cloned()
            .collect();
        receipts.sort_by_key(|s| s.receipt.receipt_global_no);
        Ok(receipts)
    }

    async fn blocking_receipts_for_day(
        &self,
        fiscal_day_id: i64,
    ) -> Result<Vec<StoredReceipt>> {
        let mut receipts: Vec<StoredReceipt> = self
            .read()?
            .receipts
            .values()
            .filter(|s| {
                s.fiscal_day_id == fiscal_day_id
                    && matches!(
                        s.validation_color,
                        Some(ValidationColor::Red) | Some(ValidationColor::Grey)
                    )
            })
            .cloned()
            .collect();
        receipts.sort_by_key(|s| s.receipt.receipt_global_no);
        Ok(receipts)
    }

    async fn notes_for_original(
        &self,
        original_server_receipt_id: i64,
    ) -> Result<(Vec<StoredReceipt>, Vec<StoredReceipt>)> {
        let inner = self.read()?;
        let mut credits = Vec::new();
        let mut debits = Vec::new();
        for stored in inner.receipts.values() {
            let Some(reference) = stored.receipt.credit_debit_ref else {
                continue;
            };
            if reference.receipt_id != Some(original_server_receipt_id) {
                continue;
            }
            match stored.receipt.receipt_type {
                ReceiptType::CreditNote => credits.push(stored.clone()),
                ReceiptType::DebitNote => debits.push(stored.clone()),
                ReceiptType::FiscalInvoice => {}
            }
        }
        credits.sort_by_key(|s| s.receipt.receipt_global_no);
        debits.sort_by_key(|s| s.receipt.receipt_global_no);
        Ok((credits, debits))
    }

    async fn insert_counters(
        &self,
        fiscal_day_id: i64,
        counters: &[FiscalCounter],
    ) -> Result<()> {
        let kept: Vec<FiscalCounter> = counters
            .iter()
            .filter(|c| !c.value.is_zero())
            .cloned()
            .collect();
        self.write()?.counters.insert(fiscal_day_id, kept);
        Ok(())
    }

    async fn counters_for_day(&self, fiscal_day_id: i64) -> Result<Vec<FiscalCounter>> {
        let mut counters = self
            .read()?
            .counters
            .get(&fiscal_day_id)
            .cloned()
            .unwrap_or_default();
        counters.sort_by_key(|c| c.key());
        Ok(counters)
    }
}

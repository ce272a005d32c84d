//! The fiscal-day controller.
//!
//! Open and close transitions, counter aggregation and the day-level
//! server signature. Close runs either Manual reconciliation (the device
//! submits counters, the server checks equality) or Auto (the server
//! computes counters, the device signature over the canonical day must
//! verify).

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fdms_core::{
    canonical, DocumentQuantity, ErrorCode, FiscalCounter, FiscalCounterType, FiscalDay,
    FiscalDayStatus, ReceiptType, ReconciliationMode, ServerSignature, Sha256Hash, SignatureData,
};
use fdms_pki::DeviceVerifier;
use fdms_store::{Store, StoredReceipt};

use crate::error::{DomainError, FdmsError, Result};
use crate::Fdms;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDayRequest {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDayResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub fiscal_day_no: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDayRequest {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    /// Non-empty counters select Manual reconciliation.
    #[serde(default)]
    pub fiscal_day_counters: Vec<FiscalCounter>,
    #[serde(default)]
    pub fiscal_day_device_signature: Option<SignatureData>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDayResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub fiscal_day_server_signature: ServerSignature,
    pub fiscal_day_counters: Vec<FiscalCounter>,
    pub fiscal_day_document_quantities: Vec<DocumentQuantity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStatusResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub fiscal_day_status: FiscalDayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_day_no: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_day_reconciliation_mode: Option<ReconciliationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_day_server_signature: Option<ServerSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_day_closed: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_receipt_global_no: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fiscal_day_counters: Vec<FiscalCounter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fiscal_day_document_quantities: Vec<DocumentQuantity>,
}

impl<S: Store> Fdms<S> {
    /// Transition Closed → Opened: a fresh day with the next day number.
    pub async fn open_fiscal_day(&self, request: OpenDayRequest) -> Result<OpenDayResponse> {
        let device = self.require_device(request.device_id).await?;
        self.require_online(&device)?;

        let current = self.store.current_fiscal_day(device.device_id).await?;
        if let Some(current) = &current {
            if current.status == FiscalDayStatus::FiscalDayOpened {
                return Err(FdmsError::domain(
                    ErrorCode::Fisc01,
                    "Fiscal day is already opened",
                ));
            }
            if current.status != FiscalDayStatus::FiscalDayClosed {
                return Err(FdmsError::domain(
                    ErrorCode::Fisc02,
                    "Previous fiscal day is not closed",
                ));
            }
        }

        let day_no = current.map(|d| d.day_no + 1).unwrap_or(1);
        let day = FiscalDay::open(device.device_id, day_no, self.clock().now());
        self.store.insert_fiscal_day(&day).await?;

        info!(device_id = device.device_id, day_no, "fiscal day opened");
        Ok(OpenDayResponse {
            operation_id: self.ids().operation_id(),
            fiscal_day_no: day_no,
        })
    }

    /// Transition Opened/CloseFailed → Closed.
    ///
    /// Rejects while any receipt of the day is Red or Grey. A counter
    /// mismatch or a bad device signature parks the day in CloseFailed
    /// with a closing error code; the next submit or close attempt may
    /// recover it.
    pub async fn close_fiscal_day(&self, request: CloseDayRequest) -> Result<CloseDayResponse> {
        let device = self.require_device(request.device_id).await?;
        self.require_online(&device)?;

        let mut day = self
            .store
            .current_fiscal_day(device.device_id)
            .await?
            .ok_or_else(|| FdmsError::domain(ErrorCode::Fisc03, "No fiscal day to close"))?;
        if !day.status.closable() {
            return Err(FdmsError::domain(
                ErrorCode::Fisc03,
                "Fiscal day cannot be closed",
            ));
        }

        let blocking = self.store.blocking_receipts_for_day(day.id).await?;
        if !blocking.is_empty() {
            return Err(FdmsError::Domain(
                DomainError::unprocessable(
                    ErrorCode::Fisc04,
                    "Fiscal day has receipts with validation errors",
                )
                .with_detail("blocking-errors"),
            ));
        }

        let receipts = self.store.receipts_for_day(day.id).await?;
        let computed = counters_from_receipts(&receipts);

        let mode = if request.fiscal_day_counters.is_empty() {
            ReconciliationMode::Auto
        } else {
            ReconciliationMode::Manual
        };

        let counters = match mode {
            ReconciliationMode::Manual => {
                if !counters_match(&request.fiscal_day_counters, &computed) {
                    self.mark_close_failed(&mut day, "CountersMismatch").await?;
                    return Err(FdmsError::Domain(
                        DomainError::unprocessable(
                            ErrorCode::Fisc04,
                            "Submitted counters do not match the server computation",
                        )
                        .with_detail("counter-mismatch"),
                    ));
                }
                request.fiscal_day_counters.clone()
            }
            ReconciliationMode::Auto => {
                let Some(signature) = &request.fiscal_day_device_signature else {
                    self.mark_close_failed(&mut day, "BadCertificateSignature")
                        .await?;
                    return Err(FdmsError::Domain(
                        DomainError::unprocessable(
                            ErrorCode::Fisc04,
                            "Device signature is required for auto reconciliation",
                        )
                        .with_detail("missing-device-signature"),
                    ));
                };
                if !self.day_signature_valid(&device, &day, &computed, signature)? {
                    self.mark_close_failed(&mut day, "BadCertificateSignature")
                        .await?;
                    return Err(FdmsError::Domain(
                        DomainError::unprocessable(
                            ErrorCode::Fisc04,
                            "Device signature does not verify",
                        )
                        .with_detail("bad-device-signature"),
                    ));
                }
                computed
            }
        };

        // Server counter-signature over the canonical day.
        let closed_at = self.clock().now();
        let server_bytes = canonical::day_server_bytes(
            day.device_id,
            day.day_no,
            day.opened_at.date(),
            closed_at,
            mode,
            &counters,
            request
                .fiscal_day_device_signature
                .as_ref()
                .map(|s| s.signature.as_slice()),
        )?;
        let server_hash = Sha256Hash::hash(&server_bytes);
        let server_signature = ServerSignature {
            hash: server_hash,
            signature: self.signer().sign(&server_bytes),
            thumbprint: self.chain().thumbprint(),
        };

        day.status = FiscalDayStatus::FiscalDayClosed;
        day.closed_at = Some(closed_at);
        day.reconciliation_mode = Some(mode);
        day.device_signature = request.fiscal_day_device_signature.clone();
        day.server_signature = Some(server_signature.clone());
        day.closing_error_code = None;
        self.store.update_fiscal_day(&day).await?;
        self.store.insert_counters(day.id, &counters).await?;

        info!(
            device_id = device.device_id,
            day_no = day.day_no,
            mode = mode.name(),
            "fiscal day closed"
        );

        Ok(CloseDayResponse {
            operation_id: self.ids().operation_id(),
            fiscal_day_server_signature: server_signature,
            fiscal_day_document_quantities: document_quantities(&receipts),
            fiscal_day_counters: counters,
        })
    }

    /// Current day status for GetStatus / GetFiscalDayStatus.
    pub async fn fiscal_day_status(&self, device_id: u32) -> Result<DayStatusResponse> {
        let device = self.require_device(device_id).await?;
        self.require_online(&device)?;

        let Some(day) = self.store.current_fiscal_day(device.device_id).await? else {
            return Ok(DayStatusResponse {
                operation_id: self.ids().operation_id(),
                fiscal_day_status: FiscalDayStatus::FiscalDayClosed,
                fiscal_day_no: None,
                fiscal_day_reconciliation_mode: None,
                fiscal_day_server_signature: None,
                fiscal_day_closed: None,
                last_receipt_global_no: None,
                fiscal_day_counters: Vec::new(),
                fiscal_day_document_quantities: Vec::new(),
            });
        };

        // Counters and document quantities are reported only for days
        // that closed under Manual reconciliation.
        let manual_close = day.status == FiscalDayStatus::FiscalDayClosed
            && day.reconciliation_mode == Some(ReconciliationMode::Manual);
        let (counters, quantities) = if manual_close {
            let counters = self.store.counters_for_day(day.id).await?;
            let receipts = self.store.receipts_for_day(day.id).await?;
            (counters, document_quantities(&receipts))
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(DayStatusResponse {
            operation_id: self.ids().operation_id(),
            fiscal_day_status: day.status,
            fiscal_day_no: Some(day.day_no),
            fiscal_day_reconciliation_mode: day.reconciliation_mode,
            fiscal_day_server_signature: day.server_signature,
            fiscal_day_closed: day.closed_at,
            last_receipt_global_no: day.last_receipt_global_no,
            fiscal_day_counters: counters,
            fiscal_day_document_quantities: quantities,
        })
    }

    async fn mark_close_failed(&self, day: &mut FiscalDay, error_code: &str) -> Result<()> {
        warn!(
            device_id = day.device_id,
            day_no = day.day_no,
            error_code,
            "fiscal day close failed"
        );
        day.status = FiscalDayStatus::FiscalDayCloseFailed;
        day.closing_error_code = Some(error_code.to_string());
        self.store.update_fiscal_day(day).await?;
        Ok(())
    }

    /// Verify the device's signature over the canonical day encoding.
    fn day_signature_valid(
        &self,
        device: &fdms_core::Device,
        day: &FiscalDay,
        counters: &[FiscalCounter],
        signature: &SignatureData,
    ) -> Result<bool> {
        let device_bytes = canonical::day_device_bytes(
            day.device_id,
            day.day_no,
            day.opened_at.date(),
            counters,
        )?;
        if signature.hash != Sha256Hash::hash(&device_bytes) {
            return Ok(false);
        }
        let Some(pem) = device.certificate_pem.as_deref() else {
            return Ok(false);
        };
        let Ok(verifier) = DeviceVerifier::from_cert_pem(pem) else {
            return Ok(false);
        };
        Ok(verifier.verify(&device_bytes, &signature.signature).is_ok())
    }
}

/// Aggregate the day's counters from its persisted receipts.
///
/// Tax-keyed counters group by (taxID, percent, currency); the balance
/// counters group payments by (moneyType, currency). Zero-valued rows
/// are dropped.
pub fn counters_from_receipts(receipts: &[StoredReceipt]) -> Vec<FiscalCounter> {
    type TaxKey = (FiscalCounterType, String, i32, Option<Decimal>);
    let mut by_tax: BTreeMap<TaxKey, Decimal> = BTreeMap::new();
    let mut by_money: BTreeMap<(String, fdms_core::MoneyType), Decimal> = BTreeMap::new();

    for stored in receipts {
        let receipt = &stored.receipt;
        let currency = receipt.currency.to_uppercase();

        let (sales_type, tax_type) = match receipt.receipt_type {
            ReceiptType::FiscalInvoice => {
                (FiscalCounterType::SaleByTax, FiscalCounterType::SaleTaxByTax)
            }
            ReceiptType::CreditNote => (
                FiscalCounterType::CreditNoteByTax,
                FiscalCounterType::CreditNoteTaxByTax,
            ),
            ReceiptType::DebitNote => (
                FiscalCounterType::DebitNoteByTax,
                FiscalCounterType::DebitNoteTaxByTax,
            ),
        };

        for tax in &receipt.taxes {
            let percent = tax.tax_percent.map(|p| p.round_dp(2));
            *by_tax
                .entry((sales_type, currency.clone(), tax.tax_id, percent))
                .or_default() += tax.sales_amount_with_tax;
            *by_tax
                .entry((tax_type, currency.clone(), tax.tax_id, percent))
                .or_default() += tax.tax_amount;
        }

        for payment in &receipt.payments {
            *by_money
                .entry((currency.clone(), payment.money_type_code))
                .or_default() += payment.payment_amount;
        }
    }

    let mut counters: Vec<FiscalCounter> = by_tax
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|((counter_type, currency, tax_id, percent), value)| FiscalCounter {
            counter_type,
            currency,
            tax_id: Some(tax_id),
            tax_percent: percent,
            money_type: None,
            value,
        })
        .collect();

    counters.extend(
        by_money
            .into_iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|((currency, money_type), value)| FiscalCounter {
                counter_type: FiscalCounterType::BalanceByMoneyType,
                currency,
                tax_id: None,
                tax_percent: None,
                money_type: Some(money_type),
                value,
            }),
    );

    counters.sort_by_key(|c| c.key());
    counters
}

/// Per (type, currency, keyDim) equality within 0.01, both directions.
pub fn counters_match(submitted: &[FiscalCounter], computed: &[FiscalCounter]) -> bool {
    let tolerance = Decimal::new(1, 2);

    let index = |counters: &[FiscalCounter]| -> BTreeMap<_, Decimal> {
        counters
            .iter()
            .filter(|c| !c.value.is_zero())
            .map(|c| (c.key(), c.value))
            .collect()
    };

    let submitted = index(submitted);
    let computed = index(computed);

    if submitted.len() != computed.len() {
        return false;
    }
    submitted.iter().all(|(key, value)| {
        computed
            .get(key)
            .is_some_and(|other| (*value - *other).abs() <= tolerance)
    })
}

/// Receipt counts and totals per (type, currency).
pub fn document_quantities(receipts: &[StoredReceipt]) -> Vec<DocumentQuantity> {
    let mut grouped: BTreeMap<(String, String), (ReceiptType, u32, Decimal)> = BTreeMap::new();
    for stored in receipts {
        let receipt = &stored.receipt;
        let key = (
            receipt.receipt_type.name().to_string(),
            receipt.currency.to_uppercase(),
        );
        let entry = grouped
            .entry(key)
            .or_insert((receipt.receipt_type, 0, Decimal::ZERO));
        entry.1 += 1;
        entry.2 += receipt.receipt_total;
    }

    grouped
        .into_iter()
        .map(|((_, currency), (receipt_type, quantity, total))| DocumentQuantity {
            receipt_type,
            currency,
            receipt_quantity: quantity,
            receipt_total_amount: total,
        })
        .collect()
}

//! The receipt pipeline.
//!
//! Every submission runs the same phases: resolve device and day, dedup,
//! chain lookup, validation, hashing, counter-signing, persistence.
//! Validation violations never abort the pipeline; the receipt is stored
//! with its color and only technical faults roll back.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use fdms_core::{
    canonical, crypto::base64_signature, qr, validate_credit_debit_note, validate_receipt,
    CreditDebitContext, ErrorCode, Receipt, ReceiptContext, ServerSignature, Sha256Hash,
    ValidationCode, ValidationOutcome,
};
use fdms_pki::DeviceVerifier;
use fdms_store::{Store, StoredReceipt};

use crate::error::{DomainError, FdmsError, Result};
use crate::Fdms;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceiptRequest {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceiptResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    #[serde(rename = "receiptID")]
    pub receipt_id: i64,
    pub server_date: NaiveDateTime,
    pub receipt_server_signature: ServerSignature,
    /// Verification string printed as a QR code on the receipt.
    pub receipt_qr_data: String,
}

impl<S: Store> Fdms<S> {
    /// Submit a receipt in online mode.
    ///
    /// Idempotent by (deviceID, receiptGlobalNo) plus hash: a
    /// byte-identical resubmission returns the stored signature; a
    /// different payload at the same position is rejected.
    pub async fn submit_receipt(
        &self,
        request: SubmitReceiptRequest,
    ) -> Result<SubmitReceiptResponse> {
        let receipt = request.receipt;

        // Phase 1: device, operating mode.
        let device = self.require_device(request.device_id).await?;
        self.require_online(&device)?;
        if receipt.device_id != device.device_id {
            return Err(FdmsError::domain(
                ErrorCode::Dev01,
                "Receipt device id does not match the authenticated device",
            ));
        }

        // Phase 2: the current fiscal day must admit receipts.
        let day = self
            .store
            .current_fiscal_day(device.device_id)
            .await?
            .filter(|d| d.status.admits_receipts())
            .ok_or_else(|| FdmsError::domain(ErrorCode::Rcpt01, "No fiscal day opened"))?;

        // Phase 3: dedup on (deviceID, receiptGlobalNo).
        if let Some(existing) = self
            .store
            .get_receipt_by_global_no(device.device_id, receipt.receipt_global_no)
            .await?
        {
            return self.replay_or_reject(&receipt, existing).await;
        }

        // Phase 4: chain predecessor.
        let previous = if receipt.receipt_counter > 1 && receipt.receipt_global_no > 1 {
            self.store
                .get_receipt_in_day(device.device_id, day.id, receipt.receipt_global_no - 1)
                .await?
        } else {
            None
        };

        // Phase 5: validation.
        let taxpayer = self.require_taxpayer(&device).await?;
        let applicable_taxes = self.store.list_taxes().await?;
        let mut outcome = validate_receipt(&ReceiptContext {
            receipt: &receipt,
            previous: previous.as_ref().map(|p| &p.receipt),
            taxpayer: &taxpayer,
            applicable_taxes: &applicable_taxes,
            currency_whitelist: &self.config.currency_whitelist,
            day_opened: day.opened_at,
            day_max_hours: taxpayer.day_max_hours,
            now: self.clock().now(),
        });

        if receipt.receipt_type.is_note() {
            outcome.merge(self.validate_note(&receipt).await?);
        }

        // Phase 6: canonical encoding and chain hash.
        let prev_hash = previous.as_ref().map(|p| *p.receipt_hash.as_bytes());
        let canonical_bytes =
            canonical::receipt_bytes(&receipt, prev_hash.as_ref()).map_err(|e| {
                DomainError::unprocessable(ErrorCode::Rcpt02, "Receipt amounts are out of range")
                    .with_detail(e.to_string())
            })?;
        let receipt_hash = Sha256Hash::hash(&canonical_bytes);

        // Device signature check: declared hash and signature must both
        // hold against the canonical bytes. With a gap in the chain the
        // device's previous hash is unknown and the check cannot run;
        // the counter rules already marked the receipt Grey.
        let chain_context_complete = receipt.receipt_counter == 1 || previous.is_some();
        if chain_context_complete
            && !self.device_signature_valid(&device, &receipt, &canonical_bytes, receipt_hash)
        {
            outcome.add(ValidationCode::Rcpt020);
        }

        // Phase 7: counter-signature.
        let server_receipt_id = self.store.reserve_server_receipt_id().await?;
        let server_date = self.clock().now();
        let signing_input = format!(
            "{}{}{}",
            base64_signature(&receipt.device_signature.signature),
            server_receipt_id,
            canonical::format_date_time(server_date),
        );
        let server_signature = ServerSignature {
            hash: receipt_hash,
            signature: self.signer().sign(signing_input.as_bytes()),
            thumbprint: self.chain().thumbprint(),
        };

        // Phase 8: persist receipt, children and day cursor atomically.
        let operation_id = self.ids().operation_id();
        let color = outcome.color();
        let stored = StoredReceipt {
            id: 0,
            server_receipt_id,
            operation_id: operation_id.clone(),
            fiscal_day_id: day.id,
            taxpayer_id: taxpayer.id,
            receipt,
            receipt_hash,
            server_signature: Some(server_signature.clone()),
            server_date: Some(server_date),
            validation_color: color,
            validation_errors: outcome.violations.iter().map(|v| v.describe()).collect(),
        };

        match self.store.insert_receipt(&stored).await {
            Ok(_) => {}
            Err(fdms_store::StoreError::Conflict(_)) => {
                // Lost a race on (deviceID, receiptGlobalNo).
                let existing = self
                    .store
                    .get_receipt_by_global_no(
                        stored.receipt.device_id,
                        stored.receipt.receipt_global_no,
                    )
                    .await?
                    .ok_or_else(|| {
                        // Not a chain-position race: the invoice number
                        // is already taken for this taxpayer.
                        FdmsError::domain(
                            ErrorCode::Rcpt02,
                            "Invoice number already used for this taxpayer",
                        )
                    })?;
                return self.replay_or_reject(&stored.receipt, existing).await;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            operation_id = %operation_id,
            device_id = device.device_id,
            receipt_global_no = stored.receipt.receipt_global_no,
            color = color.map(|c| c.name()).unwrap_or("none"),
            "receipt accepted"
        );

        Ok(SubmitReceiptResponse {
            operation_id,
            receipt_id: server_receipt_id,
            server_date,
            receipt_server_signature: server_signature,
            receipt_qr_data: receipt_qr(&taxpayer.qr_url_base, &stored.receipt),
        })
    }

    /// Dedup outcome: the stored response for a byte-identical replay,
    /// `RCPT04` for a different payload at the same chain position.
    async fn replay_or_reject(
        &self,
        submitted: &Receipt,
        existing: StoredReceipt,
    ) -> Result<SubmitReceiptResponse> {
        let prev_hash = if submitted.receipt_counter > 1 {
            self.store
                .get_receipt_in_day(
                    submitted.device_id,
                    existing.fiscal_day_id,
                    submitted.receipt_global_no.saturating_sub(1),
                )
                .await?
                .map(|p| *p.receipt_hash.as_bytes())
        } else {
            None
        };

        let candidate = canonical::receipt_bytes(submitted, prev_hash.as_ref())
            .map(|bytes| Sha256Hash::hash(&bytes))
            .ok();

        if candidate == Some(existing.receipt_hash) {
            let (Some(server_date), Some(server_signature)) =
                (existing.server_date, existing.server_signature.clone())
            else {
                return Err(FdmsError::domain(ErrorCode::Rcpt04, "Duplicate receipt"));
            };
            info!(
                device_id = submitted.device_id,
                receipt_global_no = submitted.receipt_global_no,
                "duplicate receipt, returning stored signature"
            );
            let taxpayer = self
                .store
                .get_taxpayer(existing.taxpayer_id)
                .await?
                .map(|t| t.qr_url_base)
                .unwrap_or_default();
            return Ok(SubmitReceiptResponse {
                operation_id: existing.operation_id,
                receipt_id: existing.server_receipt_id,
                server_date,
                receipt_server_signature: server_signature,
                receipt_qr_data: receipt_qr(&taxpayer, &existing.receipt),
            });
        }

        Err(FdmsError::Domain(
            DomainError::unprocessable(
                ErrorCode::Rcpt04,
                "Receipt already submitted with a different payload",
            )
            .with_detail("duplicate-mismatch"),
        ))
    }

    /// Credit/debit-note subset: resolve the original and its prior
    /// notes, then run the note rules.
    async fn validate_note(&self, note: &Receipt) -> Result<ValidationOutcome> {
        let Some(original_id) = note.credit_debit_ref.and_then(|r| r.receipt_id) else {
            // RCPT015 already covers the missing reference.
            return Ok(ValidationOutcome::default());
        };

        let original = self.store.get_receipt_by_server_id(original_id).await?;
        let (credit_notes, debit_notes) = self.store.notes_for_original(original_id).await?;

        let prior_credit_total = credit_notes
            .iter()
            .map(|n| n.receipt.receipt_total)
            .sum();
        let prior_debit_total = debit_notes.iter().map(|n| n.receipt.receipt_total).sum();

        Ok(validate_credit_debit_note(
            note,
            &CreditDebitContext {
                original: original.as_ref().map(|o| &o.receipt),
                prior_credit_total,
                prior_debit_total,
            },
        ))
    }

    fn device_signature_valid(
        &self,
        device: &fdms_core::Device,
        receipt: &Receipt,
        canonical_bytes: &[u8],
        computed_hash: Sha256Hash,
    ) -> bool {
        if receipt.device_signature.hash != computed_hash {
            return false;
        }
        let Some(pem) = device.certificate_pem.as_deref() else {
            return false;
        };
        let Ok(verifier) = DeviceVerifier::from_cert_pem(pem) else {
            return false;
        };
        verifier
            .verify(canonical_bytes, &receipt.device_signature.signature)
            .is_ok()
    }
}

/// The QR verification string for a receipt.
fn receipt_qr(qr_url_base: &str, receipt: &Receipt) -> String {
    qr::qr_data(
        qr_url_base,
        receipt.device_id,
        receipt.receipt_date.date(),
        receipt.receipt_global_no,
        &receipt.device_signature.signature,
    )
}


//! End-to-end receipt pipeline and fiscal-day scenarios.
//!
//! Every test drives the assembled service against the in-memory store
//! with a fixed clock and deterministic ids, simulating the device side
//! with a real P-256 key and CA-issued certificate.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use fdms::{
    Clock, CloseDayRequest, Fdms, FdmsConfig, FixedClock, OpenDayRequest, RegisterDeviceRequest,
    SequentialIds, SubmitReceiptRequest,
};
use fdms_core::{
    canonical, ErrorCode, FiscalCounter, FiscalCounterType, FiscalDayStatus, MoneyType, Payment,
    PrintForm, Receipt, ReceiptLine, ReceiptLineType, ReceiptTax, ReceiptType, ReconciliationMode,
    Sha256Hash, SignatureData,
};
use fdms_store::{MemoryStore, Store};
use fdms_testkit::fixtures::t0;
use fdms_testkit::{seed_device, seed_taxes, seed_taxpayer, DeviceSim, TestPki};

const DEVICE_ID: u32 = 1001;

struct TestBed {
    fdms: Fdms<MemoryStore>,
    clock: Arc<FixedClock>,
    device: DeviceSim,
}

impl TestBed {
    async fn new() -> Self {
        let pki = TestPki::generate();
        let clock = Arc::new(FixedClock::new(t0()));
        let fdms = Fdms::new(
            MemoryStore::new(),
            pki.ca,
            pki.signer,
            pki.chain,
            FdmsConfig::default(),
            clock.clone(),
            Arc::new(SequentialIds::new()),
        );

        let taxpayer_id = fdms.store().insert_taxpayer(&seed_taxpayer()).await.unwrap();
        fdms.store()
            .insert_device(&seed_device(taxpayer_id, DEVICE_ID))
            .await
            .unwrap();
        for tax in seed_taxes() {
            fdms.store().insert_tax(&tax).await.unwrap();
        }

        let device = DeviceSim::generate();
        let cn = format!("FDMS-SN-{DEVICE_ID}-{DEVICE_ID:010}");
        fdms.register_device(
            RegisterDeviceRequest {
                device_id: DEVICE_ID,
                activation_key: "A1B2C3D4".into(),
                certificate_request: device.csr(&cn),
            },
            "FiscalPro",
            "2.1",
        )
        .await
        .unwrap();

        Self {
            fdms,
            clock,
            device,
        }
    }

    /// Open a day at the clock's current time, then move the clock to
    /// trading hours so receipt dates are never "in the future".
    async fn open_day(&self) -> u32 {
        let day_no = self
            .fdms
            .open_fiscal_day(OpenDayRequest {
                device_id: DEVICE_ID,
            })
            .await
            .unwrap()
            .fiscal_day_no;
        let opened = self.clock.now();
        self.clock.set(opened + chrono::Duration::minutes(75));
        day_no
    }

    /// A clean tax-inclusive invoice with one 15% line.
    fn invoice(&self, counter: u32, global_no: u32, total: Decimal) -> Receipt {
        Receipt {
            device_id: DEVICE_ID,
            receipt_type: ReceiptType::FiscalInvoice,
            currency: "USD".into(),
            receipt_counter: counter,
            receipt_global_no: global_no,
            invoice_no: format!("INV-{global_no:04}"),
            buyer: None,
            notes: None,
            receipt_date: "2026-03-02T09:15:00".parse().unwrap(),
            credit_debit_ref: None,
            lines_tax_inclusive: true,
            lines: vec![ReceiptLine {
                line_type: ReceiptLineType::Sale,
                line_no: 1,
                hs_code: Some("8471".into()),
                line_name: "Widget".into(),
                line_price: Some(total),
                line_quantity: dec!(1),
                line_total: total,
                tax_code: Some("A".into()),
                tax_percent: Some(dec!(15)),
                tax_id: 1,
            }],
            taxes: vec![ReceiptTax {
                tax_code: Some("A".into()),
                tax_percent: Some(dec!(15)),
                tax_id: 1,
                tax_amount: (total * dec!(15) / dec!(115)).round_dp(2),
                sales_amount_with_tax: total,
            }],
            payments: vec![Payment {
                money_type_code: MoneyType::Cash,
                payment_amount: total,
            }],
            receipt_total: total,
            print_form: PrintForm::Receipt48,
            device_signature: SignatureData {
                hash: Sha256Hash::from_bytes([0u8; 32]),
                signature: vec![],
            },
        }
    }

    /// Sign the receipt the way the device would, chaining on
    /// `prev_hash`.
    fn sign(&self, mut receipt: Receipt, prev_hash: Option<&[u8; 32]>) -> Receipt {
        let bytes = canonical::receipt_bytes(&receipt, prev_hash).unwrap();
        receipt.device_signature = self.device.sign(&bytes);
        receipt
    }

    async fn submit(&self, receipt: Receipt) -> fdms::Result<fdms::SubmitReceiptResponse> {
        self.fdms
            .submit_receipt(SubmitReceiptRequest {
                device_id: DEVICE_ID,
                receipt,
            })
            .await
    }

    async fn stored_hash(&self, global_no: u32) -> [u8; 32] {
        *self
            .fdms
            .store()
            .get_receipt_by_global_no(DEVICE_ID, global_no)
            .await
            .unwrap()
            .unwrap()
            .receipt_hash
            .as_bytes()
    }

    async fn stored_color(&self, global_no: u32) -> Option<fdms_core::ValidationColor> {
        self.fdms
            .store()
            .get_receipt_by_global_no(DEVICE_ID, global_no)
            .await
            .unwrap()
            .unwrap()
            .validation_color
    }

    /// Counters the device would report for its own chain, matching the
    /// server aggregation for clean single-tax days.
    async fn computed_counters(&self) -> Vec<FiscalCounter> {
        let day = self
            .fdms
            .store()
            .current_fiscal_day(DEVICE_ID)
            .await
            .unwrap()
            .unwrap();
        let receipts = self.fdms.store().receipts_for_day(day.id).await.unwrap();
        fdms::fiscal_day::counters_from_receipts(&receipts)
    }

    /// Device signature over the canonical day, for Auto closes.
    async fn day_signature(&self) -> SignatureData {
        let day = self
            .fdms
            .store()
            .current_fiscal_day(DEVICE_ID)
            .await
            .unwrap()
            .unwrap();
        let counters = self.computed_counters().await;
        let bytes =
            canonical::day_device_bytes(DEVICE_ID, day.day_no, day.opened_at.date(), &counters)
                .unwrap();
        self.device.sign(&bytes)
    }
}

fn domain_code(err: &fdms::FdmsError) -> Option<ErrorCode> {
    err.as_domain().and_then(|d| d.code)
}

// ─────────────────────────────────────────────────────────────────────
// Seeded scenarios
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_first_receipt() {
    let bed = TestBed::new().await;
    assert_eq!(bed.open_day().await, 1);

    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    let response = bed.submit(receipt).await.unwrap();

    assert_eq!(response.receipt_id, 1);
    assert_eq!(response.server_date, bed.clock.now());
    assert!(!response.receipt_server_signature.signature.is_empty());
    assert!(response
        .receipt_qr_data
        .starts_with("https://fdms.example/receipt/0000001001/02032026/0000000001/"));

    assert_eq!(bed.stored_color(1).await, None);

    let day = bed
        .fdms
        .store()
        .current_fiscal_day(DEVICE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.last_receipt_global_no, Some(1));
}

#[tokio::test]
async fn duplicate_submit_is_idempotent() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    let first = bed.submit(receipt.clone()).await.unwrap();
    let second = bed.submit(receipt).await.unwrap();

    // Byte-identical response, single stored row.
    assert_eq!(first, second);
    let day = bed
        .fdms
        .store()
        .current_fiscal_day(DEVICE_ID)
        .await
        .unwrap()
        .unwrap();
    let receipts = bed.fdms.store().receipts_for_day(day.id).await.unwrap();
    assert_eq!(receipts.len(), 1);
}

#[tokio::test]
async fn duplicate_with_different_payload_is_rejected() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(receipt).await.unwrap();

    let mut altered = bed.invoice(1, 1, dec!(90.00));
    altered.invoice_no = "INV-ALT".into();
    let altered = bed.sign(altered, None);
    let err = bed.submit(altered).await.unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Rcpt04));
    assert_eq!(
        err.as_domain().unwrap().detail.as_deref(),
        Some("duplicate-mismatch")
    );
}

#[tokio::test]
async fn chain_gap_is_grey() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    // Receipt 1 reaches the server.
    let r1 = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(r1).await.unwrap();
    let h1 = bed.stored_hash(1).await;

    // Receipt 2 is lost in transit; the device still chains on it.
    let r2 = bed.sign(bed.invoice(2, 2, dec!(40.00)), Some(&h1));
    let h2 = Sha256Hash::hash(&canonical::receipt_bytes(&r2, Some(&h1)).unwrap());

    // Receipt 3 arrives with a hole at position 2.
    let r3 = bed.sign(bed.invoice(3, 3, dec!(20.00)), Some(h2.as_bytes()));
    let response = bed.submit(r3).await;
    assert!(response.is_ok(), "gap receipts are accepted");

    let stored = bed
        .fdms
        .store()
        .get_receipt_by_global_no(DEVICE_ID, 3)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.validation_color,
        Some(fdms_core::ValidationColor::Grey)
    );
    assert!(stored
        .validation_errors
        .iter()
        .any(|e| e.starts_with("RCPT011")));
}

#[tokio::test]
async fn blocking_receipt_prevents_close() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    // Invalid currency: accepted, stored Red.
    let mut bad = bed.invoice(1, 1, dec!(100.00));
    bad.currency = "XXX".into();
    let bad = bed.sign(bad, None);
    bed.submit(bad).await.unwrap();
    assert_eq!(
        bed.stored_color(1).await,
        Some(fdms_core::ValidationColor::Red)
    );

    let err = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: vec![],
            fiscal_day_device_signature: Some(bed.day_signature().await),
        })
        .await
        .unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Fisc04));
    assert_eq!(
        err.as_domain().unwrap().detail.as_deref(),
        Some("blocking-errors")
    );
}

#[tokio::test]
async fn manual_reconciliation_mismatch_is_rejected() {
    let bed = TestBed::new().await;
    bed.open_day().await;
    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(receipt).await.unwrap();

    let mut counters = bed.computed_counters().await;
    let sale = counters
        .iter_mut()
        .find(|c| c.counter_type == FiscalCounterType::SaleByTax)
        .unwrap();
    sale.value += dec!(0.02);

    let err = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: counters,
            fiscal_day_device_signature: None,
        })
        .await
        .unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Fisc04));
    assert_eq!(
        err.as_domain().unwrap().detail.as_deref(),
        Some("counter-mismatch")
    );

    // The day parks in CloseFailed with an error code.
    let day = bed
        .fdms
        .store()
        .current_fiscal_day(DEVICE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.status, FiscalDayStatus::FiscalDayCloseFailed);
    assert_eq!(day.closing_error_code.as_deref(), Some("CountersMismatch"));
}

#[tokio::test]
async fn credit_note_over_original_is_red() {
    let bed = TestBed::new().await;
    bed.open_day().await;
    let original = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    let original_response = bed.submit(original).await.unwrap();
    let h1 = bed.stored_hash(1).await;

    let mut note = bed.invoice(2, 2, dec!(-120.00));
    note.receipt_type = ReceiptType::CreditNote;
    note.invoice_no = "CN-0001".into();
    note.notes = Some("refund".into());
    note.receipt_date = "2026-03-02T11:00:00".parse().unwrap();
    note.credit_debit_ref = Some(fdms_core::CreditDebitRef {
        receipt_id: Some(original_response.receipt_id),
        device_id: Some(DEVICE_ID),
        receipt_global_no: Some(1),
        fiscal_day_no: Some(1),
    });
    note.lines[0].line_price = Some(dec!(-120.00));
    note.taxes[0].tax_amount = (dec!(-120.00) * dec!(15) / dec!(115)).round_dp(2);

    let note = bed.sign(note, Some(&h1));
    let response = bed.submit(note).await;
    assert!(response.is_ok(), "over-crediting is accepted but flagged");

    let stored = bed
        .fdms
        .store()
        .get_receipt_by_global_no(DEVICE_ID, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.validation_color,
        Some(fdms_core::ValidationColor::Red)
    );
    assert!(stored
        .validation_errors
        .iter()
        .any(|e| e.starts_with("RCPT035")));
}

// ─────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn counter_continuity_across_days() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let mut prev: Option<[u8; 32]> = None;
    for n in 1..=3u32 {
        let receipt = bed.sign(
            bed.invoice(n, n, dec!(10.00)),
            prev.as_ref(),
        );
        bed.submit(receipt).await.unwrap();
        assert_eq!(bed.stored_color(n).await, None, "receipt {n} is clean");
        prev = Some(bed.stored_hash(n).await);
    }

    // Close Auto and open the next day: the per-day counter restarts at
    // 1 while the global number continues.
    bed.clock.set("2026-03-02T18:00:00".parse().unwrap());
    bed.fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: vec![],
            fiscal_day_device_signature: Some(bed.day_signature().await),
        })
        .await
        .unwrap();

    bed.clock.set("2026-03-03T08:00:00".parse().unwrap());
    assert_eq!(bed.open_day().await, 2);

    let mut next = bed.invoice(1, 4, dec!(25.00));
    next.invoice_no = "INV-DAY2-0001".into();
    next.receipt_date = "2026-03-03T08:30:00".parse().unwrap();
    let next = bed.sign(next, None);
    bed.submit(next).await.unwrap();
    assert_eq!(bed.stored_color(4).await, None);
}

#[tokio::test]
async fn hash_chain_holds_for_every_receipt() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let mut prev: Option<[u8; 32]> = None;
    for n in 1..=3u32 {
        let receipt = bed.sign(bed.invoice(n, n, dec!(10.00) * Decimal::from(n)), prev.as_ref());
        bed.submit(receipt).await.unwrap();
        prev = Some(bed.stored_hash(n).await);
    }

    let day = bed
        .fdms
        .store()
        .current_fiscal_day(DEVICE_ID)
        .await
        .unwrap()
        .unwrap();
    let receipts = bed.fdms.store().receipts_for_day(day.id).await.unwrap();
    assert_eq!(receipts.len(), 3);

    for window in receipts.windows(2) {
        let (previous, current) = (&window[0], &window[1]);
        let bytes = canonical::receipt_bytes(
            &current.receipt,
            Some(previous.receipt_hash.as_bytes()),
        )
        .unwrap();
        assert_eq!(Sha256Hash::hash(&bytes), current.receipt_hash);
    }
}

#[tokio::test]
async fn at_most_one_open_day() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let err = bed
        .fdms
        .open_fiscal_day(OpenDayRequest {
            device_id: DEVICE_ID,
        })
        .await
        .unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Fisc01));
}

#[tokio::test]
async fn manual_close_with_exact_counters_succeeds() {
    let bed = TestBed::new().await;
    bed.open_day().await;
    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(receipt).await.unwrap();

    let counters = bed.computed_counters().await;
    bed.clock.set("2026-03-02T18:00:00".parse().unwrap());
    let response = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: counters.clone(),
            fiscal_day_device_signature: None,
        })
        .await
        .unwrap();
    assert_eq!(response.fiscal_day_counters.len(), counters.len());
    assert_eq!(response.fiscal_day_document_quantities.len(), 1);

    // Status for a Manual close reports the persisted counters.
    let status = bed.fdms.fiscal_day_status(DEVICE_ID).await.unwrap();
    assert_eq!(status.fiscal_day_status, FiscalDayStatus::FiscalDayClosed);
    assert_eq!(
        status.fiscal_day_reconciliation_mode,
        Some(ReconciliationMode::Manual)
    );
    assert!(!status.fiscal_day_counters.is_empty());
    assert!(status.fiscal_day_server_signature.is_some());
}

#[tokio::test]
async fn auto_close_verifies_device_signature() {
    let bed = TestBed::new().await;
    bed.open_day().await;
    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(receipt).await.unwrap();

    // Missing signature is rejected.
    let err = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: vec![],
            fiscal_day_device_signature: None,
        })
        .await
        .unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Fisc04));

    // A valid signature over the canonical day closes it.
    bed.clock.set("2026-03-02T18:00:00".parse().unwrap());
    let signature = bed.day_signature().await;
    let response = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: vec![],
            fiscal_day_device_signature: Some(signature),
        })
        .await
        .unwrap();
    assert!(!response.fiscal_day_server_signature.signature.is_empty());

    let status = bed.fdms.fiscal_day_status(DEVICE_ID).await.unwrap();
    assert_eq!(status.fiscal_day_status, FiscalDayStatus::FiscalDayClosed);
    assert_eq!(
        status.fiscal_day_reconciliation_mode,
        Some(ReconciliationMode::Auto)
    );
    // Auto closes do not report counters on status.
    assert!(status.fiscal_day_counters.is_empty());
}

#[tokio::test]
async fn close_failed_day_recovers_via_submit() {
    let bed = TestBed::new().await;
    bed.open_day().await;
    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    bed.submit(receipt).await.unwrap();

    // Force CloseFailed with a mismatching counter set.
    let mut counters = bed.computed_counters().await;
    counters[0].value += dec!(5.00);
    let _ = bed
        .fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: counters,
            fiscal_day_device_signature: None,
        })
        .await
        .unwrap_err();

    // The day still admits receipts and flips back to Opened.
    let h1 = bed.stored_hash(1).await;
    let r2 = bed.sign(bed.invoice(2, 2, dec!(50.00)), Some(&h1));
    bed.submit(r2).await.unwrap();

    let day = bed
        .fdms
        .store()
        .current_fiscal_day(DEVICE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.status, FiscalDayStatus::FiscalDayOpened);
    assert!(day.closing_error_code.is_none());

    // And now an exact manual close goes through.
    let counters = bed.computed_counters().await;
    bed.clock.set("2026-03-02T19:00:00".parse().unwrap());
    bed.fdms
        .close_fiscal_day(CloseDayRequest {
            device_id: DEVICE_ID,
            fiscal_day_counters: counters,
            fiscal_day_device_signature: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn tampered_device_signature_is_red() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    let mut receipt = bed.invoice(1, 1, dec!(100.00));
    let bytes = canonical::receipt_bytes(&receipt, None).unwrap();
    receipt.device_signature = bed.device.sign_badly(&bytes);

    bed.submit(receipt).await.unwrap();
    let stored = bed
        .fdms
        .store()
        .get_receipt_by_global_no(DEVICE_ID, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.validation_color,
        Some(fdms_core::ValidationColor::Red)
    );
    assert!(stored
        .validation_errors
        .iter()
        .any(|e| e.starts_with("RCPT020")));
}

#[tokio::test]
async fn submit_without_open_day_is_rejected() {
    let bed = TestBed::new().await;
    let receipt = bed.sign(bed.invoice(1, 1, dec!(100.00)), None);
    let err = bed.submit(receipt).await.unwrap_err();
    assert_eq!(domain_code(&err), Some(ErrorCode::Rcpt01));
}

#[tokio::test]
async fn validation_errors_never_abort_persistence() {
    let bed = TestBed::new().await;
    bed.open_day().await;

    // Red on several axes at once: wrong totals, missing payment.
    let mut bad = bed.invoice(1, 1, dec!(100.00));
    bad.receipt_total = dec!(55.00);
    bad.payments.clear();
    let bad = bed.sign(bad, None);
    let response = bed.submit(bad).await.unwrap();
    assert!(response.receipt_id > 0);

    let stored = bed
        .fdms
        .store()
        .get_receipt_by_global_no(DEVICE_ID, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.validation_color,
        Some(fdms_core::ValidationColor::Red)
    );
    assert!(stored.validation_errors.len() >= 2);
}

//! # FDMS Core
//!
//! Pure domain primitives for the fiscal device management service:
//! receipts, fiscal days, the canonical codec and the validation engine.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over fiscal data structures.
//!
//! ## Key Types
//!
//! - [`Receipt`] - A submitted fiscal receipt (invoice, credit or debit note)
//! - [`FiscalDay`] - One bounded hash-chain period per device
//! - [`Sha256Hash`] - The 32-byte chain hash
//! - [`ValidationColor`] - Grey/Yellow/Red severity of rule violations
//!
//! ## Canonicalization
//!
//! Receipts and fiscal-day counter sets are encoded as deterministic byte
//! strings before hashing. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod fiscal_day;
pub mod party;
pub mod qr;
pub mod receipt;
pub mod tax;
pub mod types;
pub mod validation;

pub use canonical::{cents, day_device_bytes, day_server_bytes, receipt_bytes};
pub use crypto::{ServerSignature, Sha256Hash, SignatureData, Thumbprint};
pub use error::{CoreError, ErrorCode};
pub use fiscal_day::{DocumentQuantity, FiscalCounter, FiscalDay};
pub use party::{Address, Branch, Contacts, Device, Taxpayer};
pub use receipt::{Buyer, CreditDebitRef, Payment, Receipt, ReceiptLine, ReceiptTax};
pub use tax::Tax;
pub use types::{
    DeviceStatus, FiscalCounterType, FiscalDayStatus, MoneyType, OperatingMode, PrintForm,
    ReceiptLineType, ReceiptType, ReconciliationMode, TaxpayerStatus, ValidationColor,
};
pub use validation::{
    validate_credit_debit_note, validate_receipt, CreditDebitContext, ReceiptContext,
    ValidationCode, ValidationOutcome, Violation,
};

/// Length of a device activation key.
pub const ACTIVATION_KEY_LEN: usize = 8;

/// Maximum length of a device serial number.
pub const MAX_SERIAL_NO_LEN: usize = 20;

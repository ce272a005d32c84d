//! Receipt: the atomic unit of the fiscal chain.
//!
//! A receipt is immutable once the server counter-signs it. Corrections
//! are represented as credit or debit notes referencing the original.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::crypto::SignatureData;
use crate::types::{MoneyType, PrintForm, ReceiptLineType, ReceiptType};

/// Buyer block, present on request of the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    pub register_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_name: Option<String>,
    #[serde(rename = "buyerTIN")]
    pub tin: String,
    #[serde(rename = "VATNumber", skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
}

/// Reference from a credit/debit note to the credited/debited invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditDebitRef {
    #[serde(rename = "receiptID", skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<i64>,
    #[serde(rename = "deviceID", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_global_no: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_day_no: Option<u32>,
}

/// One line of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLine {
    pub line_type: ReceiptLineType,
    pub line_no: u32,
    /// Harmonized-system code. Mandatory for VAT-registered taxpayers.
    #[serde(rename = "lineHSCode", skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,
    pub line_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_price: Option<Decimal>,
    pub line_quantity: Decimal,
    pub line_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_percent: Option<Decimal>,
    #[serde(rename = "taxID")]
    pub tax_id: i32,
}

/// Per-tax aggregation row of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptTax {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_percent: Option<Decimal>,
    #[serde(rename = "taxID")]
    pub tax_id: i32,
    pub tax_amount: Decimal,
    pub sales_amount_with_tax: Decimal,
}

/// One payment row of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub money_type_code: MoneyType,
    pub payment_amount: Decimal,
}

/// A fiscal receipt as validated by the server.
///
/// This is the internal record: wire DTOs live at the service boundary
/// and the persisted row (with server id, chain hash and color) in the
/// store crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    pub receipt_type: ReceiptType,
    /// ISO currency code from the configured whitelist.
    pub currency: String,
    /// Per-day sequence, restarting at 1 on day open.
    pub receipt_counter: u32,
    /// Per-device sequence, strictly monotonic across days.
    pub receipt_global_no: u32,
    /// Unique within the taxpayer.
    pub invoice_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<Buyer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Device wall clock at issuance, second precision, no zone.
    pub receipt_date: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_debit_ref: Option<CreditDebitRef>,
    pub lines_tax_inclusive: bool,
    pub lines: Vec<ReceiptLine>,
    pub taxes: Vec<ReceiptTax>,
    pub payments: Vec<Payment>,
    pub receipt_total: Decimal,
    #[serde(default)]
    pub print_form: PrintForm,
    pub device_signature: SignatureData,
}

impl Receipt {
    /// Sum of all line totals.
    pub fn lines_total(&self) -> Decimal {
        self.lines.iter().map(|l| l.line_total).sum()
    }

    /// Sum of all tax amounts.
    pub fn taxes_total(&self) -> Decimal {
        self.taxes.iter().map(|t| t.tax_amount).sum()
    }

    /// Sum of all sales-with-tax amounts.
    pub fn sales_with_tax_total(&self) -> Decimal {
        self.taxes.iter().map(|t| t.sales_amount_with_tax).sum()
    }

    /// Sum of all payment amounts.
    pub fn payments_total(&self) -> Decimal {
        self.payments.iter().map(|p| p.payment_amount).sum()
    }
}

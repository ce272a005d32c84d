//! Domain enums shared across the service.
//!
//! Every enum exposes its stable wire name through serde and a `name()`
//! accessor. The canonical codec consumes `name()`; numeric positions
//! never reach the hash input.

use serde::{Deserialize, Serialize};

/// The kind of fiscal receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiptType {
    FiscalInvoice,
    CreditNote,
    DebitNote,
}

impl ReceiptType {
    /// Stable wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::FiscalInvoice => "FiscalInvoice",
            Self::CreditNote => "CreditNote",
            Self::DebitNote => "DebitNote",
        }
    }

    /// Parse from a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FiscalInvoice" => Some(Self::FiscalInvoice),
            "CreditNote" => Some(Self::CreditNote),
            "DebitNote" => Some(Self::DebitNote),
            _ => None,
        }
    }

    /// Credit and debit notes reference an original invoice.
    pub fn is_note(self) -> bool {
        matches!(self, Self::CreditNote | Self::DebitNote)
    }
}

/// Payment method of a receipt payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoneyType {
    Cash,
    Card,
    MobileWallet,
    Coupon,
    Credit,
    BankTransfer,
    Other,
}

impl MoneyType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Card => "Card",
            Self::MobileWallet => "MobileWallet",
            Self::Coupon => "Coupon",
            Self::Credit => "Credit",
            Self::BankTransfer => "BankTransfer",
            Self::Other => "Other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Cash" => Some(Self::Cash),
            "Card" => Some(Self::Card),
            "MobileWallet" => Some(Self::MobileWallet),
            "Coupon" => Some(Self::Coupon),
            "Credit" => Some(Self::Credit),
            "BankTransfer" => Some(Self::BankTransfer),
            "Other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Kind of a single receipt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptLineType {
    Sale,
    Discount,
}

impl ReceiptLineType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sale => "Sale",
            Self::Discount => "Discount",
        }
    }
}

/// Print layout requested for the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrintForm {
    #[default]
    Receipt48,
    InvoiceA4,
}

impl PrintForm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Receipt48 => "Receipt48",
            Self::InvoiceA4 => "InvoiceA4",
        }
    }
}

/// Lifecycle state of a fiscal day.
///
/// `CloseInitiated` exists only transiently during an asynchronous close
/// and admits receipts like `Opened` until resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalDayStatus {
    FiscalDayClosed,
    FiscalDayOpened,
    FiscalDayCloseInitiated,
    FiscalDayCloseFailed,
}

impl FiscalDayStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::FiscalDayClosed => "FiscalDayClosed",
            Self::FiscalDayOpened => "FiscalDayOpened",
            Self::FiscalDayCloseInitiated => "FiscalDayCloseInitiated",
            Self::FiscalDayCloseFailed => "FiscalDayCloseFailed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FiscalDayClosed" => Some(Self::FiscalDayClosed),
            "FiscalDayOpened" => Some(Self::FiscalDayOpened),
            "FiscalDayCloseInitiated" => Some(Self::FiscalDayCloseInitiated),
            "FiscalDayCloseFailed" => Some(Self::FiscalDayCloseFailed),
            _ => None,
        }
    }

    /// Whether a receipt may be submitted against a day in this state.
    pub fn admits_receipts(self) -> bool {
        matches!(
            self,
            Self::FiscalDayOpened | Self::FiscalDayCloseFailed | Self::FiscalDayCloseInitiated
        )
    }

    /// Whether the day may transition to Closed from this state.
    pub fn closable(self) -> bool {
        matches!(self, Self::FiscalDayOpened | Self::FiscalDayCloseFailed)
    }
}

/// How the day's counters were established at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationMode {
    /// Server computes the counters; device signs the canonical day.
    Auto,
    /// Device submits the counters; server checks equality.
    Manual,
}

impl ReconciliationMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Manual => "Manual",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Auto" => Some(Self::Auto),
            "Manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// The seven fiscal counter kinds persisted at day close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FiscalCounterType {
    SaleByTax,
    SaleTaxByTax,
    CreditNoteByTax,
    CreditNoteTaxByTax,
    DebitNoteByTax,
    DebitNoteTaxByTax,
    BalanceByMoneyType,
}

impl FiscalCounterType {
    pub fn name(self) -> &'static str {
        match self {
            Self::SaleByTax => "SaleByTax",
            Self::SaleTaxByTax => "SaleTaxByTax",
            Self::CreditNoteByTax => "CreditNoteByTax",
            Self::CreditNoteTaxByTax => "CreditNoteTaxByTax",
            Self::DebitNoteByTax => "DebitNoteByTax",
            Self::DebitNoteTaxByTax => "DebitNoteTaxByTax",
            Self::BalanceByMoneyType => "BalanceByMoneyType",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SaleByTax" => Some(Self::SaleByTax),
            "SaleTaxByTax" => Some(Self::SaleTaxByTax),
            "CreditNoteByTax" => Some(Self::CreditNoteByTax),
            "CreditNoteTaxByTax" => Some(Self::CreditNoteTaxByTax),
            "DebitNoteByTax" => Some(Self::DebitNoteByTax),
            "DebitNoteTaxByTax" => Some(Self::DebitNoteTaxByTax),
            "BalanceByMoneyType" => Some(Self::BalanceByMoneyType),
            _ => None,
        }
    }

    /// Counters keyed by tax dimension (as opposed to money type).
    pub fn is_tax_keyed(self) -> bool {
        !matches!(self, Self::BalanceByMoneyType)
    }
}

/// Receipt processing mode of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Online,
    Offline,
}

impl OperatingMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Online" => Some(Self::Online),
            "Offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Administrative state of a device row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Active,
    Blocked,
    Revoked,
}

impl DeviceStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Blocked => "Blocked",
            Self::Revoked => "Revoked",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Active" => Some(Self::Active),
            "Blocked" => Some(Self::Blocked),
            "Revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Administrative state of a taxpayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxpayerStatus {
    Active,
    Inactive,
}

impl TaxpayerStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Active" => Some(Self::Active),
            "Inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Severity of a validation violation.
///
/// Ordering is `Red > Yellow > Grey`; Red and Grey block day closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationColor {
    Grey,
    Yellow,
    Red,
}

impl ValidationColor {
    pub fn name(self) -> &'static str {
        match self {
            Self::Grey => "Grey",
            Self::Yellow => "Yellow",
            Self::Red => "Red",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Grey" => Some(Self::Grey),
            "Yellow" => Some(Self::Yellow),
            "Red" => Some(Self::Red),
            _ => None,
        }
    }

    /// Severity rank used when aggregating per-rule colors.
    pub fn severity(self) -> u8 {
        match self {
            Self::Grey => 1,
            Self::Yellow => 2,
            Self::Red => 3,
        }
    }

    /// Red and Grey receipts prevent the fiscal day from closing.
    pub fn blocks_close(self) -> bool {
        matches!(self, Self::Red | Self::Grey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_type_names_roundtrip() {
        for t in [
            ReceiptType::FiscalInvoice,
            ReceiptType::CreditNote,
            ReceiptType::DebitNote,
        ] {
            assert_eq!(ReceiptType::from_name(t.name()), Some(t));
        }
        assert_eq!(ReceiptType::from_name("Invoice"), None);
    }

    #[test]
    fn money_type_names_roundtrip() {
        for m in [
            MoneyType::Cash,
            MoneyType::Card,
            MoneyType::MobileWallet,
            MoneyType::Coupon,
            MoneyType::Credit,
            MoneyType::BankTransfer,
            MoneyType::Other,
        ] {
            assert_eq!(MoneyType::from_name(m.name()), Some(m));
        }
    }

    #[test]
    fn counter_type_names_roundtrip() {
        for c in [
            FiscalCounterType::SaleByTax,
            FiscalCounterType::SaleTaxByTax,
            FiscalCounterType::CreditNoteByTax,
            FiscalCounterType::CreditNoteTaxByTax,
            FiscalCounterType::DebitNoteByTax,
            FiscalCounterType::DebitNoteTaxByTax,
            FiscalCounterType::BalanceByMoneyType,
        ] {
            assert_eq!(FiscalCounterType::from_name(c.name()), Some(c));
        }
        assert!(FiscalCounterType::SaleByTax.is_tax_keyed());
        assert!(!FiscalCounterType::BalanceByMoneyType.is_tax_keyed());
    }

    #[test]
    fn day_status_admission() {
        assert!(FiscalDayStatus::FiscalDayOpened.admits_receipts());
        assert!(FiscalDayStatus::FiscalDayCloseFailed.admits_receipts());
        assert!(FiscalDayStatus::FiscalDayCloseInitiated.admits_receipts());
        assert!(!FiscalDayStatus::FiscalDayClosed.admits_receipts());

        assert!(FiscalDayStatus::FiscalDayOpened.closable());
        assert!(FiscalDayStatus::FiscalDayCloseFailed.closable());
        assert!(!FiscalDayStatus::FiscalDayCloseInitiated.closable());
    }

    #[test]
    fn color_ordering() {
        assert!(ValidationColor::Red.severity() > ValidationColor::Yellow.severity());
        assert!(ValidationColor::Yellow.severity() > ValidationColor::Grey.severity());
        assert!(ValidationColor::Red.blocks_close());
        assert!(ValidationColor::Grey.blocks_close());
        assert!(!ValidationColor::Yellow.blocks_close());
    }

    #[test]
    fn wire_names_are_variant_names() {
        let json = serde_json::to_string(&ReceiptType::FiscalInvoice).unwrap();
        assert_eq!(json, "\"FiscalInvoice\"");
        let json = serde_json::to_string(&ValidationColor::Grey).unwrap();
        assert_eq!(json, "\"Grey\"");
    }
}

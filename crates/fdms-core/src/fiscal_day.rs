//! Fiscal days and their counters.
//!
//! A fiscal day is one bounded period per device during which receipts
//! form a single signed hash chain. At most one day per device is in a
//! non-Closed state at any time.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::crypto::{ServerSignature, SignatureData};
use crate::types::{FiscalCounterType, FiscalDayStatus, MoneyType, ReceiptType, ReconciliationMode};

/// A fiscal day row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiscalDay {
    pub id: i64,
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    /// Monotonic per device, starting at 1.
    pub day_no: u32,
    pub opened_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<NaiveDateTime>,
    pub status: FiscalDayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_mode: Option<ReconciliationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_signature: Option<SignatureData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_signature: Option<ServerSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_error_code: Option<String>,
    /// Cursor: global number of the last receipt accepted into this day.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_receipt_global_no: Option<u32>,
}

impl FiscalDay {
    /// A freshly opened day.
    pub fn open(device_id: u32, day_no: u32, opened_at: NaiveDateTime) -> Self {
        Self {
            id: 0,
            device_id,
            day_no,
            opened_at,
            closed_at: None,
            status: FiscalDayStatus::FiscalDayOpened,
            reconciliation_mode: None,
            device_signature: None,
            server_signature: None,
            closing_error_code: None,
            last_receipt_global_no: None,
        }
    }
}

/// One fiscal counter, derived from the day's receipts and persisted at
/// close. Keyed by (type, currency, taxID-or-moneyType).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalCounter {
    #[serde(rename = "fiscalCounterType")]
    pub counter_type: FiscalCounterType,
    #[serde(rename = "fiscalCounterCurrency")]
    pub currency: String,
    #[serde(rename = "fiscalCounterTaxID", skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<i32>,
    #[serde(rename = "fiscalCounterTaxPercent", skip_serializing_if = "Option::is_none")]
    pub tax_percent: Option<Decimal>,
    #[serde(rename = "fiscalCounterMoneyType", skip_serializing_if = "Option::is_none")]
    pub money_type: Option<MoneyType>,
    #[serde(rename = "fiscalCounterValue")]
    pub value: Decimal,
}

impl FiscalCounter {
    /// The sort/lookup key: (type, currency, taxID-or-moneyType).
    ///
    /// Money types order by their position in the payment-method list,
    /// mirroring the tax-id ordering on the tax-keyed counters.
    pub fn key(&self) -> (FiscalCounterType, String, i64) {
        let dim = match (self.tax_id, self.money_type) {
            (Some(tax_id), _) => i64::from(tax_id),
            (None, Some(money_type)) => money_type as i64,
            (None, None) => -1,
        };
        (self.counter_type, self.currency.to_uppercase(), dim)
    }
}

/// Per (receipt type, currency) document count and total for a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuantity {
    pub receipt_type: ReceiptType,
    pub currency: String,
    pub receipt_quantity: u32,
    pub receipt_total_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn open_day_shape() {
        let day = FiscalDay::open(1001, 1, "2026-03-02T08:00:00".parse().unwrap());
        assert_eq!(day.status, FiscalDayStatus::FiscalDayOpened);
        assert_eq!(day.day_no, 1);
        assert!(day.closed_at.is_none());
        assert!(day.last_receipt_global_no.is_none());
    }

    #[test]
    fn counter_keys_distinguish_dimensions() {
        let by_tax = FiscalCounter {
            counter_type: FiscalCounterType::SaleByTax,
            currency: "usd".into(),
            tax_id: Some(3),
            tax_percent: Some(dec!(15)),
            money_type: None,
            value: dec!(100),
        };
        let by_money = FiscalCounter {
            counter_type: FiscalCounterType::BalanceByMoneyType,
            currency: "USD".into(),
            tax_id: None,
            tax_percent: None,
            money_type: Some(MoneyType::Card),
            value: dec!(100),
        };
        assert_eq!(by_tax.key(), (FiscalCounterType::SaleByTax, "USD".into(), 3));
        assert_eq!(
            by_money.key(),
            (FiscalCounterType::BalanceByMoneyType, "USD".into(), 1)
        );
    }
}

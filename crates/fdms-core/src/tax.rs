//! The applicable-tax table.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of the tax table. A tax is identified for hashing and
/// validation by the pair `(tax_id, percent)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tax {
    pub tax_id: i32,
    /// `None` means exempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_percent: Option<Decimal>,
    pub tax_name: String,
    pub valid_from: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_till: Option<NaiveDate>,
}

impl Tax {
    /// Whether the validity range covers `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        if date < self.valid_from {
            return false;
        }
        match self.valid_till {
            Some(till) => date <= till,
            None => true,
        }
    }
}

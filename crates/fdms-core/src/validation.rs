//! The receipt rule catalog.
//!
//! Each rule is deterministic and emits at most one violation. A
//! violation carries a code and a severity color; the receipt's overall
//! color is the most severe present (`Red > Yellow > Grey`). Red and Grey
//! receipts are stored but block day closure; Yellow is a warning.
//!
//! Grey marks preconditions the server could not verify because
//! referenced data is missing, typically a gap in the chain.

use chrono::{Duration, Months, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::party::Taxpayer;
use crate::receipt::Receipt;
use crate::tax::Tax;
use crate::types::{ReceiptLineType, ReceiptType, ValidationColor};

/// Codes of the validation catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    Rcpt010,
    Rcpt011,
    Rcpt012,
    Rcpt014,
    Rcpt015,
    Rcpt016,
    Rcpt017,
    Rcpt018,
    Rcpt019,
    Rcpt020,
    Rcpt021,
    Rcpt022,
    Rcpt023,
    Rcpt024,
    Rcpt025,
    Rcpt026,
    Rcpt027,
    Rcpt028,
    Rcpt029,
    Rcpt030,
    Rcpt031,
    Rcpt032,
    Rcpt033,
    Rcpt034,
    Rcpt035,
    Rcpt036,
    Rcpt037,
    Rcpt038,
    Rcpt039,
    Rcpt040,
    Rcpt041,
    Rcpt042,
    Rcpt043,
    Rcpt047,
    Rcpt048,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rcpt010 => "RCPT010",
            Self::Rcpt011 => "RCPT011",
            Self::Rcpt012 => "RCPT012",
            Self::Rcpt014 => "RCPT014",
            Self::Rcpt015 => "RCPT015",
            Self::Rcpt016 => "RCPT016",
            Self::Rcpt017 => "RCPT017",
            Self::Rcpt018 => "RCPT018",
            Self::Rcpt019 => "RCPT019",
            Self::Rcpt020 => "RCPT020",
            Self::Rcpt021 => "RCPT021",
            Self::Rcpt022 => "RCPT022",
            Self::Rcpt023 => "RCPT023",
            Self::Rcpt024 => "RCPT024",
            Self::Rcpt025 => "RCPT025",
            Self::Rcpt026 => "RCPT026",
            Self::Rcpt027 => "RCPT027",
            Self::Rcpt028 => "RCPT028",
            Self::Rcpt029 => "RCPT029",
            Self::Rcpt030 => "RCPT030",
            Self::Rcpt031 => "RCPT031",
            Self::Rcpt032 => "RCPT032",
            Self::Rcpt033 => "RCPT033",
            Self::Rcpt034 => "RCPT034",
            Self::Rcpt035 => "RCPT035",
            Self::Rcpt036 => "RCPT036",
            Self::Rcpt037 => "RCPT037",
            Self::Rcpt038 => "RCPT038",
            Self::Rcpt039 => "RCPT039",
            Self::Rcpt040 => "RCPT040",
            Self::Rcpt041 => "RCPT041",
            Self::Rcpt042 => "RCPT042",
            Self::Rcpt043 => "RCPT043",
            Self::Rcpt047 => "RCPT047",
            Self::Rcpt048 => "RCPT048",
        }
    }

    /// Human-readable rule description.
    pub fn message(self) -> &'static str {
        match self {
            Self::Rcpt010 => "Wrong currency code is used",
            Self::Rcpt011 => "Receipt counter is not sequential",
            Self::Rcpt012 => "Receipt global number is not sequential",
            Self::Rcpt014 => "Receipt date is earlier than fiscal day opening date",
            Self::Rcpt015 => "Credited/debited invoice data is not provided",
            Self::Rcpt016 => "No receipt lines provided",
            Self::Rcpt017 => "Taxes information is not provided",
            Self::Rcpt018 => "Payment information is not provided",
            Self::Rcpt019 => "Receipt total is not equal to sum of all receipt lines",
            Self::Rcpt020 => "Receipt hash or device signature is not valid",
            Self::Rcpt021 => "VAT tax is used while taxpayer is not a VAT taxpayer",
            Self::Rcpt022 => "Receipt line price has the wrong sign for the receipt type",
            Self::Rcpt023 => "Receipt line quantity must be greater than 0",
            Self::Rcpt024 => "Receipt line total is not equal to unit price times quantity",
            Self::Rcpt025 => "Tax is not applicable at the receipt date",
            Self::Rcpt026 => "Incorrectly calculated tax amount",
            Self::Rcpt027 => "Incorrectly calculated total sales amount including tax",
            Self::Rcpt028 => "Payment amount has the wrong sign for the receipt type",
            Self::Rcpt029 => "Credited/debited invoice information provided for a regular invoice",
            Self::Rcpt030 => "Receipt date is earlier than previously submitted receipt date",
            Self::Rcpt031 => "Receipt is submitted with a future date",
            Self::Rcpt032 => "Credit/debit note refers to a non-existing receipt",
            Self::Rcpt033 => "Credited/debited invoice was issued more than 12 months ago",
            Self::Rcpt034 => "Note for credit/debit note is not provided",
            Self::Rcpt035 => "Total credit note amount exceeds the original invoice amount",
            Self::Rcpt036 => "Credit/debit note uses taxes not used in the original invoice",
            Self::Rcpt037 => "Receipt total is not equal to sum of all receipt lines and taxes",
            Self::Rcpt038 => "Receipt total is not equal to sum of sales amounts including tax",
            Self::Rcpt039 => "Receipt total is not equal to sum of all payment amounts",
            Self::Rcpt040 => "Receipt total has the wrong sign for the receipt type",
            Self::Rcpt041 => "Receipt is issued after the fiscal day end",
            Self::Rcpt042 => "Credit/debit note uses another currency than the original invoice",
            Self::Rcpt043 => "Mandatory buyer data fields are not provided",
            Self::Rcpt047 => "HS code must be sent if the taxpayer is a VAT payer",
            Self::Rcpt048 => "HS code length is not valid for the line's tax treatment",
        }
    }

    /// The rule's severity when its precondition data is present.
    pub fn color(self) -> ValidationColor {
        match self {
            Self::Rcpt014 | Self::Rcpt031 | Self::Rcpt041 => ValidationColor::Yellow,
            _ => ValidationColor::Red,
        }
    }
}

/// One violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub code: ValidationCode,
    pub color: ValidationColor,
}

impl Violation {
    pub fn describe(&self) -> String {
        format!("{}: {}", self.code.as_str(), self.code.message())
    }
}

/// Aggregated outcome of running the catalog over a receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    /// Record a violation at the rule's default severity.
    pub fn add(&mut self, code: ValidationCode) {
        self.add_with_color(code, code.color());
    }

    /// Record a violation at an explicit severity (chain-gap Grey cases).
    pub fn add_with_color(&mut self, code: ValidationCode, color: ValidationColor) {
        self.violations.push(Violation { code, color });
    }

    /// The most severe color present; `None` means clean.
    pub fn color(&self) -> Option<ValidationColor> {
        self.violations
            .iter()
            .map(|v| v.color)
            .max_by_key(|c| c.severity())
    }

    pub fn contains(&self, code: ValidationCode) -> bool {
        self.violations.iter().any(|v| v.code == code)
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: ValidationOutcome) {
        self.violations.extend(other.violations);
    }
}

/// Everything the main catalog needs to evaluate one receipt.
pub struct ReceiptContext<'a> {
    pub receipt: &'a Receipt,
    /// The chain predecessor, if it exists in the store.
    pub previous: Option<&'a Receipt>,
    pub taxpayer: &'a Taxpayer,
    pub applicable_taxes: &'a [Tax],
    pub currency_whitelist: &'a [String],
    pub day_opened: NaiveDateTime,
    pub day_max_hours: i64,
    /// Server clock, for the future-date rule.
    pub now: NaiveDateTime,
}

/// Data for the credit/debit-note subset.
pub struct CreditDebitContext<'a> {
    /// The resolved original invoice, if it exists.
    pub original: Option<&'a Receipt>,
    /// Sum of totals of prior credit notes against the original.
    pub prior_credit_total: Decimal,
    /// Sum of totals of prior debit notes against the original.
    pub prior_debit_total: Decimal,
}

fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn within_tolerance(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= tolerance()
}

fn percent_or_zero(p: Option<Decimal>) -> Decimal {
    p.unwrap_or(Decimal::ZERO)
}

/// Grouping key shared by lines and tax rows: (taxCode, percent).
fn tax_group_key(code: Option<&str>, percent: Option<Decimal>) -> (String, Decimal) {
    (
        code.unwrap_or("").to_string(),
        percent_or_zero(percent).round_dp(2),
    )
}

/// Run the main rule catalog.
pub fn validate_receipt(ctx: &ReceiptContext<'_>) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();
    let receipt = ctx.receipt;

    check_currency(ctx, &mut out);
    check_counters(ctx, &mut out);
    check_temporal(ctx, &mut out);
    check_structure(ctx, &mut out);
    check_totals(ctx, &mut out);
    check_lines(ctx, &mut out);
    check_taxes(ctx, &mut out);
    check_payments(ctx, &mut out);

    // RCPT043: buyer block, when present, needs name and TIN.
    if let Some(buyer) = &receipt.buyer {
        if buyer.register_name.is_empty() || buyer.tin.is_empty() {
            out.add(ValidationCode::Rcpt043);
        }
    }

    check_hs_codes(ctx, &mut out);

    out
}

/// RCPT010: currency must be whitelisted.
fn check_currency(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let currency = ctx.receipt.currency.to_uppercase();
    if !ctx
        .currency_whitelist
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&currency))
    {
        out.add(ValidationCode::Rcpt010);
    }
}

/// RCPT011/RCPT012: counter continuity. With no predecessor the server
/// cannot verify the chain, so a non-initial counter degrades to Grey.
fn check_counters(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;
    match ctx.previous {
        None => {
            if receipt.receipt_counter != 1 {
                out.add_with_color(ValidationCode::Rcpt011, ValidationColor::Grey);
            }
            if receipt.receipt_global_no != 1 && receipt.receipt_counter != 1 {
                out.add_with_color(ValidationCode::Rcpt012, ValidationColor::Grey);
            }
        }
        Some(previous) => {
            if receipt.receipt_counter != previous.receipt_counter + 1 {
                out.add(ValidationCode::Rcpt011);
            }
            if receipt.receipt_global_no != previous.receipt_global_no + 1 {
                out.add(ValidationCode::Rcpt012);
            }
        }
    }
}

/// RCPT014/RCPT030/RCPT031/RCPT041: temporal ordering.
fn check_temporal(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;

    if receipt.receipt_date < ctx.day_opened {
        out.add(ValidationCode::Rcpt014);
    }

    if let Some(previous) = ctx.previous {
        if receipt.receipt_date < previous.receipt_date {
            out.add(ValidationCode::Rcpt030);
        }
    }

    if receipt.receipt_date > ctx.now + Duration::minutes(5) {
        out.add(ValidationCode::Rcpt031);
    }

    let day_end = ctx.day_opened + Duration::hours(ctx.day_max_hours);
    if receipt.receipt_date > day_end {
        out.add(ValidationCode::Rcpt041);
    }
}

/// RCPT015-RCPT018, RCPT029: structural presence rules.
fn check_structure(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;

    if receipt.receipt_type.is_note() && receipt.credit_debit_ref.is_none() {
        out.add(ValidationCode::Rcpt015);
    }
    if receipt.receipt_type == ReceiptType::FiscalInvoice && receipt.credit_debit_ref.is_some() {
        out.add(ValidationCode::Rcpt029);
    }
    if receipt.lines.is_empty() {
        out.add(ValidationCode::Rcpt016);
    }
    if receipt.taxes.is_empty() {
        out.add(ValidationCode::Rcpt017);
    }
    if receipt.payments.is_empty() {
        out.add(ValidationCode::Rcpt018);
    }
}

/// RCPT019/RCPT037/RCPT038/RCPT039/RCPT040: arithmetic over the
/// submitted decimals, 0.01 tolerance.
fn check_totals(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;
    let lines = receipt.lines_total();
    let taxes = receipt.taxes_total();
    let sales_with_tax = receipt.sales_with_tax_total();
    let payments = receipt.payments_total();

    if receipt.lines_tax_inclusive {
        if !within_tolerance(receipt.receipt_total, lines) {
            out.add(ValidationCode::Rcpt019);
        }
    } else if !within_tolerance(receipt.receipt_total, lines + taxes) {
        out.add(ValidationCode::Rcpt037);
    }

    if !within_tolerance(receipt.receipt_total, sales_with_tax) {
        out.add(ValidationCode::Rcpt038);
    }
    if !within_tolerance(receipt.receipt_total, payments) {
        out.add(ValidationCode::Rcpt039);
    }

    match receipt.receipt_type {
        ReceiptType::FiscalInvoice | ReceiptType::DebitNote => {
            if receipt.receipt_total < Decimal::ZERO {
                out.add(ValidationCode::Rcpt040);
            }
        }
        ReceiptType::CreditNote => {
            if receipt.receipt_total > Decimal::ZERO {
                out.add(ValidationCode::Rcpt040);
            }
        }
    }
}

/// RCPT022/RCPT023/RCPT024: line-level rules.
fn check_lines(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;

    for line in &receipt.lines {
        let Some(price) = line.line_price else {
            continue;
        };
        let bad = match receipt.receipt_type {
            ReceiptType::FiscalInvoice | ReceiptType::DebitNote => match line.line_type {
                ReceiptLineType::Sale => price <= Decimal::ZERO,
                ReceiptLineType::Discount => price >= Decimal::ZERO,
            },
            ReceiptType::CreditNote => {
                line.line_type == ReceiptLineType::Sale && price >= Decimal::ZERO
            }
        };
        if bad {
            out.add(ValidationCode::Rcpt022);
            break;
        }
    }

    if receipt
        .lines
        .iter()
        .any(|l| l.line_quantity <= Decimal::ZERO)
    {
        out.add(ValidationCode::Rcpt023);
    }

    for line in &receipt.lines {
        if let Some(price) = line.line_price {
            if !within_tolerance(line.line_total, price * line.line_quantity) {
                out.add(ValidationCode::Rcpt024);
                break;
            }
        }
    }
}

/// RCPT021/RCPT025/RCPT026/RCPT027: tax consistency.
fn check_taxes(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;

    // RCPT021: non-VAT taxpayers cannot charge a positive percent.
    if !ctx.taxpayer.is_vat_registered()
        && receipt
            .taxes
            .iter()
            .any(|t| percent_or_zero(t.tax_percent) > Decimal::ZERO)
    {
        out.add(ValidationCode::Rcpt021);
    }

    // RCPT025: (taxID, percent) must exist and cover the receipt date.
    let valid: BTreeMap<(i32, Decimal), &Tax> = ctx
        .applicable_taxes
        .iter()
        .map(|t| ((t.tax_id, percent_or_zero(t.tax_percent).round_dp(2)), t))
        .collect();
    for tax in &receipt.taxes {
        let key = (tax.tax_id, percent_or_zero(tax.tax_percent).round_dp(2));
        match valid.get(&key) {
            None => {
                out.add(ValidationCode::Rcpt025);
                break;
            }
            Some(known) => {
                if !known.covers(receipt.receipt_date.date()) {
                    out.add(ValidationCode::Rcpt025);
                    break;
                }
            }
        }
    }

    // RCPT026/RCPT027: per-tax amounts against the grouped line totals.
    let mut line_totals: BTreeMap<(String, Decimal), Decimal> = BTreeMap::new();
    for line in &receipt.lines {
        let key = tax_group_key(line.tax_code.as_deref(), line.tax_percent);
        *line_totals.entry(key).or_default() += line.line_total;
    }

    let hundred = Decimal::from(100);
    for tax in &receipt.taxes {
        let key = tax_group_key(tax.tax_code.as_deref(), tax.tax_percent);
        let line_total = line_totals.get(&key).copied().unwrap_or_default();

        let expected_tax = match tax.tax_percent {
            Some(p) if receipt.lines_tax_inclusive => {
                line_total * (p / hundred) / (Decimal::ONE + p / hundred)
            }
            Some(p) => line_total * (p / hundred),
            None => Decimal::ZERO,
        };
        if !within_tolerance(tax.tax_amount, expected_tax) {
            out.add(ValidationCode::Rcpt026);
            break;
        }
    }

    for tax in &receipt.taxes {
        let key = tax_group_key(tax.tax_code.as_deref(), tax.tax_percent);
        let line_total = line_totals.get(&key).copied().unwrap_or_default();

        let expected_sales = if receipt.lines_tax_inclusive {
            line_total
        } else {
            match tax.tax_percent {
                Some(p) => line_total * (Decimal::ONE + p / hundred),
                None => line_total,
            }
        };
        if !within_tolerance(tax.sales_amount_with_tax, expected_sales) {
            out.add(ValidationCode::Rcpt027);
            break;
        }
    }
}

/// RCPT028: payment sign convention per receipt type.
fn check_payments(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    let receipt = ctx.receipt;
    for payment in &receipt.payments {
        let bad = match receipt.receipt_type {
            ReceiptType::FiscalInvoice | ReceiptType::DebitNote => {
                payment.payment_amount < Decimal::ZERO
            }
            ReceiptType::CreditNote => payment.payment_amount > Decimal::ZERO,
        };
        if bad {
            out.add(ValidationCode::Rcpt028);
            break;
        }
    }
}

/// RCPT047/RCPT048: HS codes for VAT-registered taxpayers. VAT-rated
/// lines take 4- or 8-character codes; exempt and zero-rated lines take
/// exactly 8.
fn check_hs_codes(ctx: &ReceiptContext<'_>, out: &mut ValidationOutcome) {
    if !ctx.taxpayer.is_vat_registered() {
        return;
    }
    for line in &ctx.receipt.lines {
        let Some(hs_code) = line.hs_code.as_deref().filter(|c| !c.is_empty()) else {
            out.add(ValidationCode::Rcpt047);
            return;
        };
        let len = hs_code.len();
        let vat_rated = percent_or_zero(line.tax_percent) > Decimal::ZERO;
        let ok = if vat_rated {
            len == 4 || len == 8
        } else {
            len == 8
        };
        if !ok {
            out.add(ValidationCode::Rcpt048);
            return;
        }
    }
}

/// Run the credit/debit-note subset against the resolved original.
pub fn validate_credit_debit_note(
    note: &Receipt,
    ctx: &CreditDebitContext<'_>,
) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    let Some(original) = ctx.original else {
        out.add(ValidationCode::Rcpt032);
        return out;
    };

    // RCPT033: the original may be at most 12 months old.
    if let Some(cutoff) = note.receipt_date.checked_sub_months(Months::new(12)) {
        if original.receipt_date < cutoff {
            out.add(ValidationCode::Rcpt033);
        }
    }

    // RCPT034: a note body is mandatory on credit/debit notes.
    if note.notes.as_deref().unwrap_or("").is_empty() {
        out.add(ValidationCode::Rcpt034);
    }

    // RCPT035: cumulative credit cannot exceed what remains of the
    // original after prior credits and debits.
    if note.receipt_type == ReceiptType::CreditNote {
        let remaining =
            original.receipt_total - ctx.prior_credit_total.abs() + ctx.prior_debit_total;
        if remaining + note.receipt_total < -tolerance() {
            out.add(ValidationCode::Rcpt035);
        }
    }

    // RCPT036: note taxes must be a subset of the original's.
    let original_tax_ids: BTreeSet<i32> = original.taxes.iter().map(|t| t.tax_id).collect();
    if note
        .taxes
        .iter()
        .any(|t| !original_tax_ids.contains(&t.tax_id))
    {
        out.add(ValidationCode::Rcpt036);
    }

    // RCPT042: currency must match the original's.
    if !note.currency.eq_ignore_ascii_case(&original.currency) {
        out.add(ValidationCode::Rcpt042);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Sha256Hash, SignatureData};
    use crate::receipt::{Buyer, CreditDebitRef, Payment, ReceiptLine, ReceiptTax};
    use crate::types::{MoneyType, PrintForm, TaxpayerStatus};
    use rust_decimal_macros::dec;

    fn taxpayer(vat: bool) -> Taxpayer {
        Taxpayer {
            id: 1,
            tin: "1234567890".into(),
            name: "Acme".into(),
            vat_number: vat.then(|| "220001122".into()),
            status: TaxpayerStatus::Active,
            day_max_hours: 24,
            day_end_notification_hours: 2,
            qr_url_base: "https://fdms.example/receipt".into(),
        }
    }

    fn standard_taxes() -> Vec<Tax> {
        vec![
            Tax {
                tax_id: 1,
                tax_percent: Some(dec!(15)),
                tax_name: "Standard".into(),
                valid_from: "2020-01-01".parse().unwrap(),
                valid_till: None,
            },
            Tax {
                tax_id: 2,
                tax_percent: None,
                tax_name: "Exempt".into(),
                valid_from: "2020-01-01".parse().unwrap(),
                valid_till: None,
            },
        ]
    }

    fn whitelist() -> Vec<String> {
        vec!["USD".into(), "EUR".into(), "GBP".into(), "ZAR".into()]
    }

    fn clean_receipt() -> Receipt {
        Receipt {
            device_id: 1001,
            receipt_type: ReceiptType::FiscalInvoice,
            currency: "USD".into(),
            receipt_counter: 1,
            receipt_global_no: 1,
            invoice_no: "INV-0001".into(),
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
                line_price: Some(dec!(100.00)),
                line_quantity: dec!(1),
                line_total: dec!(100.00),
                tax_code: Some("A".into()),
                tax_percent: Some(dec!(15)),
                tax_id: 1,
            }],
            taxes: vec![ReceiptTax {
                tax_code: Some("A".into()),
                tax_percent: Some(dec!(15)),
                tax_id: 1,
                tax_amount: dec!(13.04),
                sales_amount_with_tax: dec!(100.00),
            }],
            payments: vec![Payment {
                money_type_code: MoneyType::Cash,
                payment_amount: dec!(100.00),
            }],
            receipt_total: dec!(100.00),
            print_form: PrintForm::Receipt48,
            device_signature: SignatureData {
                hash: Sha256Hash::from_bytes([0u8; 32]),
                signature: vec![],
            },
        }
    }

    struct Setup {
        taxpayer: Taxpayer,
        taxes: Vec<Tax>,
        whitelist: Vec<String>,
    }

    impl Setup {
        fn new() -> Self {
            Self {
                taxpayer: taxpayer(true),
                taxes: standard_taxes(),
                whitelist: whitelist(),
            }
        }

        fn ctx<'a>(&'a self, receipt: &'a Receipt) -> ReceiptContext<'a> {
            self.ctx_with_previous(receipt, None)
        }

        fn ctx_with_previous<'a>(
            &'a self,
            receipt: &'a Receipt,
            previous: Option<&'a Receipt>,
        ) -> ReceiptContext<'a> {
            ReceiptContext {
                receipt,
                previous,
                taxpayer: &self.taxpayer,
                applicable_taxes: &self.taxes,
                currency_whitelist: &self.whitelist,
                day_opened: "2026-03-02T08:00:00".parse().unwrap(),
                day_max_hours: 24,
                now: "2026-03-02T09:20:00".parse().unwrap(),
            }
        }
    }

    #[test]
    fn clean_receipt_is_clean() {
        let setup = Setup::new();
        let receipt = clean_receipt();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.violations.is_empty(), "violations: {:?}", out.violations);
        assert_eq!(out.color(), None);
    }

    #[test]
    fn unknown_currency_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.currency = "XXX".into();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt010));
        assert_eq!(out.color(), Some(ValidationColor::Red));
    }

    #[test]
    fn missing_predecessor_degrades_counter_rules_to_grey() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_counter = 3;
        receipt.receipt_global_no = 3;
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt011));
        assert!(out.contains(ValidationCode::Rcpt012));
        assert_eq!(out.color(), Some(ValidationColor::Grey));
    }

    #[test]
    fn counter_break_with_predecessor_is_red() {
        let setup = Setup::new();
        let previous = clean_receipt();
        let mut receipt = clean_receipt();
        receipt.receipt_counter = 3;
        receipt.receipt_global_no = 3;
        receipt.receipt_date = "2026-03-02T10:00:00".parse().unwrap();
        let out = validate_receipt(&setup.ctx_with_previous(&receipt, Some(&previous)));
        assert!(out.contains(ValidationCode::Rcpt011));
        assert!(out.contains(ValidationCode::Rcpt012));
        assert_eq!(out.color(), Some(ValidationColor::Red));
    }

    #[test]
    fn sequential_counters_pass() {
        let setup = Setup::new();
        let previous = clean_receipt();
        let mut receipt = clean_receipt();
        receipt.receipt_counter = 2;
        receipt.receipt_global_no = 2;
        receipt.invoice_no = "INV-0002".into();
        receipt.receipt_date = "2026-03-02T10:00:00".parse().unwrap();
        let out = validate_receipt(&setup.ctx_with_previous(&receipt, Some(&previous)));
        assert!(!out.contains(ValidationCode::Rcpt011));
        assert!(!out.contains(ValidationCode::Rcpt012));
    }

    #[test]
    fn date_before_day_open_is_yellow() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_date = "2026-03-02T07:59:00".parse().unwrap();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt014));
        assert_eq!(out.color(), Some(ValidationColor::Yellow));
    }

    #[test]
    fn future_date_beyond_five_minutes_is_yellow() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_date = "2026-03-02T09:26:00".parse().unwrap();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt031));
    }

    #[test]
    fn date_after_day_end_is_yellow() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_date = "2026-03-03T08:01:00".parse().unwrap();
        let ctx = ReceiptContext {
            now: "2026-03-03T08:02:00".parse().unwrap(),
            ..setup.ctx(&receipt)
        };
        let out = validate_receipt(&ctx);
        assert!(out.contains(ValidationCode::Rcpt041));
    }

    #[test]
    fn note_without_reference_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_type = ReceiptType::CreditNote;
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt015));
    }

    #[test]
    fn invoice_with_reference_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.credit_debit_ref = Some(CreditDebitRef {
            receipt_id: Some(1),
            device_id: None,
            receipt_global_no: None,
            fiscal_day_no: None,
        });
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt029));
    }

    #[test]
    fn empty_collections_are_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines.clear();
        receipt.taxes.clear();
        receipt.payments.clear();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt016));
        assert!(out.contains(ValidationCode::Rcpt017));
        assert!(out.contains(ValidationCode::Rcpt018));
    }

    #[test]
    fn total_mismatch_tax_inclusive() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_total = dec!(90.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt019));
    }

    #[test]
    fn total_mismatch_tax_exclusive_uses_taxes_sum() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines_tax_inclusive = false;
        receipt.lines[0].line_price = Some(dec!(86.96));
        receipt.lines[0].line_total = dec!(86.96);
        // total stays 100.00 = 86.96 + 13.04
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(!out.contains(ValidationCode::Rcpt037));

        receipt.receipt_total = dec!(86.96);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt037));
    }

    #[test]
    fn payments_mismatch_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.payments[0].payment_amount = dec!(90.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt039));
    }

    #[test]
    fn negative_invoice_total_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.receipt_total = dec!(-100.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt040));
    }

    #[test]
    fn non_vat_taxpayer_with_rated_tax_is_red() {
        let mut setup = Setup::new();
        setup.taxpayer = taxpayer(false);
        let mut receipt = clean_receipt();
        receipt.lines[0].hs_code = None;
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt021));
        // Without VAT registration the HS-code rules do not fire.
        assert!(!out.contains(ValidationCode::Rcpt047));
    }

    #[test]
    fn sale_line_price_must_be_positive_on_invoice() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines[0].line_price = Some(dec!(-100.00));
        receipt.lines[0].line_total = dec!(-100.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt022));
    }

    #[test]
    fn zero_quantity_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines[0].line_quantity = dec!(0);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt023));
    }

    #[test]
    fn line_total_must_match_price_times_quantity() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines[0].line_quantity = dec!(2);
        // line_total stays 100.00, expected 200.00
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt024));
    }

    #[test]
    fn unknown_tax_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.taxes[0].tax_percent = Some(dec!(20));
        receipt.lines[0].tax_percent = Some(dec!(20));
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt025));
    }

    #[test]
    fn tax_outside_validity_window_is_red() {
        let mut setup = Setup::new();
        setup.taxes[0].valid_till = Some("2025-12-31".parse().unwrap());
        let receipt = clean_receipt();
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt025));
    }

    #[test]
    fn wrong_tax_amount_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        // Expected inclusive tax on 100.00 at 15% is 13.04.
        receipt.taxes[0].tax_amount = dec!(15.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt026));
    }

    #[test]
    fn wrong_sales_amount_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.taxes[0].sales_amount_with_tax = dec!(90.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt027));
    }

    #[test]
    fn negative_payment_on_invoice_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.payments[0].payment_amount = dec!(-100.00);
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt028));
    }

    #[test]
    fn buyer_without_tin_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.buyer = Some(Buyer {
            register_name: "Buyer Ltd".into(),
            trade_name: None,
            tin: "".into(),
            vat_number: None,
        });
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt043));
    }

    #[test]
    fn vat_payer_line_without_hs_code_is_red() {
        let setup = Setup::new();
        let mut receipt = clean_receipt();
        receipt.lines[0].hs_code = None;
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt047));
    }

    #[test]
    fn hs_code_length_rules() {
        let setup = Setup::new();

        // 6 characters: invalid for a VAT-rated line.
        let mut receipt = clean_receipt();
        receipt.lines[0].hs_code = Some("847101".into());
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt048));

        // Exempt line: 4 characters is not enough, 8 is required.
        let mut receipt = clean_receipt();
        receipt.lines[0].tax_percent = None;
        receipt.lines[0].tax_code = None;
        receipt.lines[0].tax_id = 2;
        receipt.taxes = vec![ReceiptTax {
            tax_code: None,
            tax_percent: None,
            tax_id: 2,
            tax_amount: dec!(0),
            sales_amount_with_tax: dec!(100.00),
        }];
        receipt.lines[0].hs_code = Some("8471".into());
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(out.contains(ValidationCode::Rcpt048));

        receipt.lines[0].hs_code = Some("84710000".into());
        let out = validate_receipt(&setup.ctx(&receipt));
        assert!(!out.contains(ValidationCode::Rcpt048));
    }

    fn credit_note(total: Decimal) -> Receipt {
        let mut note = clean_receipt();
        note.receipt_type = ReceiptType::CreditNote;
        note.receipt_counter = 2;
        note.receipt_global_no = 2;
        note.invoice_no = "CN-0001".into();
        note.notes = Some("refund".into());
        note.receipt_date = "2026-03-02T11:00:00".parse().unwrap();
        note.credit_debit_ref = Some(CreditDebitRef {
            receipt_id: Some(1),
            device_id: Some(1001),
            receipt_global_no: Some(1),
            fiscal_day_no: Some(1),
        });
        note.receipt_total = total;
        note
    }

    #[test]
    fn missing_original_is_red() {
        let note = credit_note(dec!(-50.00));
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: None,
                prior_credit_total: Decimal::ZERO,
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt032));
        assert_eq!(out.color(), Some(ValidationColor::Red));
    }

    #[test]
    fn over_crediting_is_red() {
        let original = clean_receipt();
        let note = credit_note(dec!(-120.00));
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: Decimal::ZERO,
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt035));
    }

    #[test]
    fn crediting_within_remaining_passes() {
        let original = clean_receipt();
        let note = credit_note(dec!(-60.00));
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: dec!(-40.00),
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(!out.contains(ValidationCode::Rcpt035));

        // One more cent over the remaining 60.00 trips the rule.
        let note = credit_note(dec!(-60.02));
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: dec!(-40.00),
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt035));
    }

    #[test]
    fn old_original_is_red() {
        let mut original = clean_receipt();
        original.receipt_date = "2025-02-01T09:00:00".parse().unwrap();
        let note = credit_note(dec!(-50.00));
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: Decimal::ZERO,
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt033));
    }

    #[test]
    fn missing_note_text_is_red() {
        let original = clean_receipt();
        let mut note = credit_note(dec!(-50.00));
        note.notes = None;
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: Decimal::ZERO,
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt034));
    }

    #[test]
    fn foreign_tax_and_currency_are_red() {
        let original = clean_receipt();
        let mut note = credit_note(dec!(-50.00));
        note.taxes[0].tax_id = 9;
        note.currency = "EUR".into();
        let out = validate_credit_debit_note(
            &note,
            &CreditDebitContext {
                original: Some(&original),
                prior_credit_total: Decimal::ZERO,
                prior_debit_total: Decimal::ZERO,
            },
        );
        assert!(out.contains(ValidationCode::Rcpt036));
        assert!(out.contains(ValidationCode::Rcpt042));
    }

    #[test]
    fn severity_aggregation_prefers_red() {
        let mut out = ValidationOutcome::default();
        out.add_with_color(ValidationCode::Rcpt011, ValidationColor::Grey);
        assert_eq!(out.color(), Some(ValidationColor::Grey));
        out.add(ValidationCode::Rcpt031);
        assert_eq!(out.color(), Some(ValidationColor::Yellow));
        out.add(ValidationCode::Rcpt010);
        assert_eq!(out.color(), Some(ValidationColor::Red));
    }
}

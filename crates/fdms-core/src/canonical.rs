//! Canonical byte encodings fed to SHA-256.
//!
//! The device and the server must produce identical bytes for identical
//! data; any reordering, rounding or case change breaks hash equality at
//! day close. Fields concatenate in a fixed order with no separators.
//!
//! The codec never fails on pre-validated input: amounts are bounded to
//! ±2^53 cents by the validation engine before they reach hashing.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::CoreError;
use crate::fiscal_day::FiscalCounter;
use crate::receipt::Receipt;
use crate::types::ReconciliationMode;

/// Largest admissible magnitude in cents. Amounts beyond this are
/// rejected during validation, never here.
pub const MAX_CENTS: i64 = 1 << 53;

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Scale an amount to integer cents, rounding to the nearest cent
/// (midpoint away from zero).
pub fn cents(amount: Decimal) -> Result<i64, CoreError> {
    let scaled = (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let value = scaled
        .to_i64()
        .ok_or_else(|| CoreError::AmountOutOfRange(amount.to_string()))?;
    if value.abs() > MAX_CENTS {
        return Err(CoreError::AmountOutOfRange(amount.to_string()));
    }
    Ok(value)
}

/// Format a tax percent exactly as the devices do: two fractional digits.
fn push_percent(out: &mut String, percent: Decimal) {
    let scaled = (percent * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    // Percents are non-negative by validation.
    let n = scaled.to_i64().unwrap_or(0);
    out.push_str(&format!("{}.{:02}", n / 100, n % 100));
}

/// Format a local timestamp with second precision and no zone.
pub fn format_date_time(ts: NaiveDateTime) -> String {
    ts.format(DATE_TIME_FORMAT).to_string()
}

/// Format a local date.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Canonical encoding of a receipt.
///
/// Order: deviceID, uppercased type name, uppercased currency, global
/// number, receipt date, total in cents, the sorted tax rows, and the raw
/// previous chain hash for every receipt after the first of the day.
pub fn receipt_bytes(receipt: &Receipt, prev_hash: Option<&[u8; 32]>) -> Result<Vec<u8>, CoreError> {
    let mut s = String::new();

    s.push_str(&receipt.device_id.to_string());
    s.push_str(&receipt.receipt_type.name().to_uppercase());
    s.push_str(&receipt.currency.to_uppercase());
    s.push_str(&receipt.receipt_global_no.to_string());
    s.push_str(&format_date_time(receipt.receipt_date));
    s.push_str(&cents(receipt.receipt_total)?.to_string());

    // Tax rows sort ascending by (taxID, taxCode), a missing code
    // ordering as the empty string.
    let mut taxes: Vec<_> = receipt.taxes.iter().collect();
    taxes.sort_by(|a, b| {
        (a.tax_id, a.tax_code.as_deref().unwrap_or(""))
            .cmp(&(b.tax_id, b.tax_code.as_deref().unwrap_or("")))
    });

    for tax in taxes {
        if let Some(code) = &tax.tax_code {
            s.push_str(code);
        }
        if let Some(percent) = tax.tax_percent {
            push_percent(&mut s, percent);
        }
        s.push_str(&cents(tax.tax_amount)?.to_string());
        s.push_str(&cents(tax.sales_amount_with_tax)?.to_string());
    }

    let mut bytes = s.into_bytes();
    if let Some(prev) = prev_hash {
        bytes.extend_from_slice(prev);
    }
    Ok(bytes)
}

/// Append the sorted counter tuples shared by both day encodings.
fn push_counters(s: &mut String, counters: &[FiscalCounter]) -> Result<(), CoreError> {
    let mut sorted: Vec<_> = counters.iter().collect();
    sorted.sort_by_key(|c| c.key());

    for counter in sorted {
        s.push_str(&counter.counter_type.name().to_uppercase());
        s.push_str(&counter.currency.to_uppercase());
        if let Some(percent) = counter.tax_percent {
            push_percent(s, percent);
        } else if let Some(money_type) = counter.money_type {
            s.push_str(&money_type.name().to_uppercase());
        }
        s.push_str(&cents(counter.value)?.to_string());
    }
    Ok(())
}

/// Canonical encoding of a fiscal day as signed by the device.
pub fn day_device_bytes(
    device_id: u32,
    day_no: u32,
    day_date: NaiveDate,
    counters: &[FiscalCounter],
) -> Result<Vec<u8>, CoreError> {
    let mut s = String::new();
    s.push_str(&device_id.to_string());
    s.push_str(&day_no.to_string());
    s.push_str(&format_date(day_date));
    push_counters(&mut s, counters)?;
    Ok(s.into_bytes())
}

/// Canonical encoding of a fiscal day as counter-signed by the server.
///
/// Extends the device form with the close timestamp and reconciliation
/// mode; under Auto reconciliation the raw device signature bytes append
/// at the end.
pub fn day_server_bytes(
    device_id: u32,
    day_no: u32,
    day_date: NaiveDate,
    updated: NaiveDateTime,
    mode: ReconciliationMode,
    counters: &[FiscalCounter],
    device_signature: Option<&[u8]>,
) -> Result<Vec<u8>, CoreError> {
    let mut s = String::new();
    s.push_str(&device_id.to_string());
    s.push_str(&day_no.to_string());
    s.push_str(&format_date(day_date));
    s.push_str(&format_date_time(updated));
    s.push_str(&mode.name().to_uppercase());
    push_counters(&mut s, counters)?;

    let mut bytes = s.into_bytes();
    if mode == ReconciliationMode::Auto {
        if let Some(sig) = device_signature {
            bytes.extend_from_slice(sig);
        }
    }
    Ok(bytes)
}

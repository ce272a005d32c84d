//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite behind
//! a mutex, wrapped in async via `tokio::task::spawn_blocking`. The
//! single connection serializes all mutations, which is stronger than
//! the per-device serialization the invariants require.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use fdms_core::{
    Branch, Device, DeviceStatus, FiscalCounter, FiscalCounterType, FiscalDay, FiscalDayStatus,
    MoneyType, OperatingMode, Payment, PrintForm, Receipt, ReceiptLine, ReceiptLineType,
    ReceiptTax, ReceiptType, ReconciliationMode, Tax, Taxpayer, TaxpayerStatus, Thumbprint,
    ValidationColor,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::record::{CertificateRecord, StoredReceipt};
use crate::traits::Store;

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store implementation.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, creating the file and
    /// running migrations as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────
// Column codecs
// ─────────────────────────────────────────────────────────────────────

fn dt_to_sql(ts: NaiveDateTime) -> String {
    ts.format(DATE_TIME_FORMAT).to_string()
}

fn dt_from_sql(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT)
        .map_err(|e| StoreError::InvalidData(format!("timestamp {s:?}: {e}")))
}

fn date_to_sql(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn date_from_sql(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StoreError::InvalidData(format!("date {s:?}: {e}")))
}

fn dec_to_sql(d: Decimal) -> String {
    d.to_string()
}

fn dec_from_sql(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| StoreError::InvalidData(format!("decimal {s:?}: {e}")))
}

fn opt_dec_from_sql(s: Option<String>) -> Result<Option<Decimal>> {
    s.map(|s| dec_from_sql(&s)).transpose()
}

fn json_to_sql<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn json_from_sql<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn thumbprint_from_sql(bytes: Vec<u8>) -> Result<Thumbprint> {
    let arr: [u8; 20] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData("thumbprint must be 20 bytes".into()))?;
    Ok(Thumbprint::from_bytes(arr))
}

fn hash_from_sql(bytes: Vec<u8>) -> Result<fdms_core::Sha256Hash> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData("hash must be 32 bytes".into()))?;
    Ok(fdms_core::Sha256Hash::from_bytes(arr))
}

fn parse_name<T>(s: &str, from_name: impl Fn(&str) -> Option<T>) -> Result<T> {
    from_name(s).ok_or_else(|| StoreError::InvalidData(format!("unknown enum name {s:?}")))
}

fn map_constraint(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, ref msg) = e {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict(msg.clone().unwrap_or_else(|| "constraint".into()));
        }
    }
    StoreError::Database(e)
}

// ─────────────────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────────────────

struct RawReceiptRow {
    id: i64,
    server_receipt_id: i64,
    operation_id: String,
    device_id: i64,
    fiscal_day_id: i64,
    taxpayer_id: i64,
    receipt_type: String,
    currency: String,
    receipt_counter: i64,
    receipt_global_no: i64,
    invoice_no: String,
    buyer: Option<String>,
    notes: Option<String>,
    receipt_date: String,
    credit_debit_ref: Option<String>,
    lines_tax_inclusive: bool,
    receipt_total: String,
    print_form: String,
    device_signature: String,
    server_signature: Option<String>,
    receipt_hash: Vec<u8>,
    server_date: Option<String>,
    validation_color: Option<String>,
    validation_errors: String,
}

const RECEIPT_COLUMNS: &str = "id, server_receipt_id, operation_id, device_id, fiscal_day_id, \
     taxpayer_id, receipt_type, currency, receipt_counter, receipt_global_no, invoice_no, buyer, \
     notes, receipt_date, credit_debit_ref, lines_tax_inclusive, receipt_total, print_form, \
     device_signature, server_signature, receipt_hash, server_date, validation_color, \
     validation_errors";

fn raw_receipt_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReceiptRow> {
    Ok(RawReceiptRow {
        id: row.get(0)?,
        server_receipt_id: row.get(1)?,
        operation_id: row.get(2)?,
        device_id: row.get(3)?,
        fiscal_day_id: row.get(4)?,
        taxpayer_id: row.get(5)?,
        receipt_type: row.get(6)?,
        currency: row.get(7)?,
        receipt_counter: row.get(8)?,
        receipt_global_no: row.get(9)?,
        invoice_no: row.get(10)?,
        buyer: row.get(11)?,
        notes: row.get(12)?,
        receipt_date: row.get(13)?,
        credit_debit_ref: row.get(14)?,
        lines_tax_inclusive: row.get(15)?,
        receipt_total: row.get(16)?,
        print_form: row.get(17)?,
        device_signature: row.get(18)?,
        server_signature: row.get(19)?,
        receipt_hash: row.get(20)?,
        server_date: row.get(21)?,
        validation_color: row.get(22)?,
        validation_errors: row.get(23)?,
    })
}

fn load_lines(conn: &Connection, receipt_rowid: i64) -> Result<Vec<ReceiptLine>> {
    let mut stmt = conn.prepare(
        "SELECT line_type, line_no, hs_code, line_name, line_price, line_quantity,
                line_total, tax_code, tax_percent, tax_id
         FROM receipt_lines WHERE receipt_id = ?1 ORDER BY line_no",
    )?;
    let raws = stmt
        .query_map(params![receipt_rowid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut lines = Vec::with_capacity(raws.len());
    for (line_type, line_no, hs_code, line_name, price, qty, total, tax_code, percent, tax_id) in
        raws
    {
        lines.push(ReceiptLine {
            line_type: parse_name(&line_type, |s| match s {
                "Sale" => Some(ReceiptLineType::Sale),
                "Discount" => Some(ReceiptLineType::Discount),
                _ => None,
            })?,
            line_no: line_no as u32,
            hs_code,
            line_name,
            line_price: opt_dec_from_sql(price)?,
            line_quantity: dec_from_sql(&qty)?,
            line_total: dec_from_sql(&total)?,
            tax_code,
            tax_percent: opt_dec_from_sql(percent)?,
            tax_id: tax_id as i32,
        });
    }
    Ok(lines)
}

fn load_taxes(conn: &Connection, receipt_rowid: i64) -> Result<Vec<ReceiptTax>> {
    let mut stmt = conn.prepare(
        "SELECT tax_code, tax_percent, tax_id, tax_amount, sales_amount_with_tax
         FROM receipt_taxes WHERE receipt_id = ?1 ORDER BY id",
    )?;
    let raws = stmt
        .query_map(params![receipt_rowid], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut taxes = Vec::with_capacity(raws.len());
    for (tax_code, percent, tax_id, amount, sales) in raws {
        taxes.push(ReceiptTax {
            tax_code,
            tax_percent: opt_dec_from_sql(percent)?,
            tax_id: tax_id as i32,
            tax_amount: dec_from_sql(&amount)?,
            sales_amount_with_tax: dec_from_sql(&sales)?,
        });
    }
    Ok(taxes)
}

fn load_payments(conn: &Connection, receipt_rowid: i64) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT money_type, payment_amount
         FROM receipt_payments WHERE receipt_id = ?1 ORDER BY id",
    )?;
    let raws = stmt
        .query_map(params![receipt_rowid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut payments = Vec::with_capacity(raws.len());
    for (money_type, amount) in raws {
        payments.push(Payment {
            money_type_code: parse_name(&money_type, MoneyType::from_name)?,
            payment_amount: dec_from_sql(&amount)?,
        });
    }
    Ok(payments)
}

fn finish_receipt(conn: &Connection, raw: RawReceiptRow) -> Result<StoredReceipt> {
    let receipt = Receipt {
        device_id: raw.device_id as u32,
        receipt_type: parse_name(&raw.receipt_type, ReceiptType::from_name)?,
        currency: raw.currency,
        receipt_counter: raw.receipt_counter as u32,
        receipt_global_no: raw.receipt_global_no as u32,
        invoice_no: raw.invoice_no,
        buyer: raw.buyer.as_deref().map(json_from_sql).transpose()?,
        notes: raw.notes,
        receipt_date: dt_from_sql(&raw.receipt_date)?,
        credit_debit_ref: raw
            .credit_debit_ref
            .as_deref()
            .map(json_from_sql)
            .transpose()?,
        lines_tax_inclusive: raw.lines_tax_inclusive,
        lines: load_lines(conn, raw.id)?,
        taxes: load_taxes(conn, raw.id)?,
        payments: load_payments(conn, raw.id)?,
        receipt_total: dec_from_sql(&raw.receipt_total)?,
        print_form: parse_name(&raw.print_form, |s| match s {
            "Receipt48" => Some(PrintForm::Receipt48),
            "InvoiceA4" => Some(PrintForm::InvoiceA4),
            _ => None,
        })?,
        device_signature: json_from_sql(&raw.device_signature)?,
    };

    Ok(StoredReceipt {
        id: raw.id,
        server_receipt_id: raw.server_receipt_id,
        operation_id: raw.operation_id,
        fiscal_day_id: raw.fiscal_day_id,
        taxpayer_id: raw.taxpayer_id,
        receipt,
        receipt_hash: hash_from_sql(raw.receipt_hash)?,
        server_signature: raw
            .server_signature
            .as_deref()
            .map(json_from_sql)
            .transpose()?,
        server_date: raw.server_date.as_deref().map(dt_from_sql).transpose()?,
        validation_color: raw
            .validation_color
            .as_deref()
            .map(|s| parse_name(s, ValidationColor::from_name))
            .transpose()?,
        validation_errors: json_from_sql(&raw.validation_errors)?,
    })
}

fn query_receipt(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<StoredReceipt>> {
    let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE {where_clause}");
    let raw = conn
        .query_row(&sql, params, raw_receipt_row)
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(finish_receipt(conn, raw)?)),
        None => Ok(None),
    }
}

fn query_receipts(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<StoredReceipt>> {
    let sql = format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE {where_clause} ORDER BY receipt_global_no"
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params, raw_receipt_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter()
        .map(|raw| finish_receipt(conn, raw))
        .collect()
}

fn device_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Device, Option<Vec<u8>>, String)> {
    // Branch JSON and thumbprint decode outside the rusqlite mapper.
    let thumbprint: Option<Vec<u8>> = row.get(10)?;
    let branch: String = row.get(12)?;
    Ok((
        Device {
            id: row.get(0)?,
            device_id: row.get::<_, i64>(1)? as u32,
            taxpayer_id: row.get(2)?,
            serial_no: row.get(3)?,
            model_name: row.get(4)?,
            model_version: row.get(5)?,
            activation_key: row.get(6)?,
            status: DeviceStatus::from_name(&row.get::<_, String>(7)?)
                .unwrap_or(DeviceStatus::Blocked),
            operating_mode: OperatingMode::from_name(&row.get::<_, String>(8)?)
                .unwrap_or(OperatingMode::Offline),
            certificate_pem: row.get(9)?,
            certificate_thumbprint: None,
            certificate_valid_till: None,
            branch: Branch::default(),
            last_ping: None,
        },
        thumbprint,
        branch,
    ))
}

const DEVICE_COLUMNS: &str = "id, device_id, taxpayer_id, serial_no, model_name, model_version, \
     activation_key, status, operating_mode, certificate_pem, certificate_thumbprint, \
     certificate_valid_till, branch, last_ping";

fn query_device(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<Device>> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE {where_clause}");
    let raw = conn
        .query_row(&sql, params, |row| {
            let (device, thumbprint, branch) = device_from_row(row)?;
            let valid_till: Option<String> = row.get(11)?;
            let last_ping: Option<String> = row.get(13)?;
            Ok((device, thumbprint, branch, valid_till, last_ping))
        })
        .optional()?;

    let Some((mut device, thumbprint, branch, valid_till, last_ping)) = raw else {
        return Ok(None);
    };
    device.certificate_thumbprint = thumbprint.map(thumbprint_from_sql).transpose()?;
    device.certificate_valid_till = valid_till.as_deref().map(dt_from_sql).transpose()?;
    device.last_ping = last_ping.as_deref().map(dt_from_sql).transpose()?;
    device.branch = json_from_sql(&branch)?;
    Ok(Some(device))
}

fn day_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(FiscalDay, RawDayExtras)> {
    Ok((
        FiscalDay {
            id: row.get(0)?,
            device_id: row.get::<_, i64>(1)? as u32,
            day_no: row.get::<_, i64>(2)? as u32,
            opened_at: chrono::NaiveDateTime::default(),
            closed_at: None,
            status: FiscalDayStatus::FiscalDayClosed,
            reconciliation_mode: None,
            device_signature: None,
            server_signature: None,
            closing_error_code: row.get(9)?,
            last_receipt_global_no: row.get::<_, Option<i64>>(10)?.map(|n| n as u32),
        },
        RawDayExtras {
            opened_at: row.get(3)?,
            closed_at: row.get(4)?,
            status: row.get(5)?,
            reconciliation_mode: row.get(6)?,
            device_signature: row.get(7)?,
            server_signature: row.get(8)?,
        },
    ))
}

struct RawDayExtras {
    opened_at: String,
    closed_at: Option<String>,
    status: String,
    reconciliation_mode: Option<String>,
    device_signature: Option<String>,
    server_signature: Option<String>,
}

const DAY_COLUMNS: &str = "id, device_id, day_no, opened_at, closed_at, status, \
     reconciliation_mode, device_signature, server_signature, closing_error_code, \
     last_receipt_global_no";

fn finish_day(raw: (FiscalDay, RawDayExtras)) -> Result<FiscalDay> {
    let (mut day, extras) = raw;
    day.opened_at = dt_from_sql(&extras.opened_at)?;
    day.closed_at = extras.closed_at.as_deref().map(dt_from_sql).transpose()?;
    day.status = parse_name(&extras.status, FiscalDayStatus::from_name)?;
    day.reconciliation_mode = extras
        .reconciliation_mode
        .as_deref()
        .map(|s| parse_name(s, ReconciliationMode::from_name))
        .transpose()?;
    day.device_signature = extras
        .device_signature
        .as_deref()
        .map(json_from_sql)
        .transpose()?;
    day.server_signature = extras
        .server_signature
        .as_deref()
        .map(json_from_sql)
        .transpose()?;
    Ok(day)
}

// ─────────────────────────────────────────────────────────────────────
// Store implementation
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn insert_taxpayer(&self, taxpayer: &Taxpayer) -> Result<i64> {
        let t = taxpayer.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO taxpayers (tin, name, vat_number, status, day_max_hours,
                     day_end_notification_hours, qr_url_base)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    t.tin,
                    t.name,
                    t.vat_number,
                    t.status.name(),
                    t.day_max_hours,
                    t.day_end_notification_hours,
                    t.qr_url_base,
                ],
            )
            .map_err(map_constraint)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_taxpayer(&self, id: i64) -> Result<Option<Taxpayer>> {
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, tin, name, vat_number, status, day_max_hours,
                            day_end_notification_hours, qr_url_base
                     FROM taxpayers WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, tin, name, vat, status, max_hours, notify_hours, qr)) = raw else {
                return Ok(None);
            };
            Ok(Some(Taxpayer {
                id,
                tin,
                name,
                vat_number: vat,
                status: parse_name(&status, TaxpayerStatus::from_name)?,
                day_max_hours: max_hours,
                day_end_notification_hours: notify_hours,
                qr_url_base: qr,
            }))
        })
        .await
    }

    async fn insert_tax(&self, tax: &Tax) -> Result<()> {
        let t = tax.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO taxes (tax_id, tax_percent, tax_name, valid_from, valid_till)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    t.tax_id,
                    t.tax_percent.map(dec_to_sql),
                    t.tax_name,
                    date_to_sql(t.valid_from),
                    t.valid_till.map(date_to_sql),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_taxes(&self) -> Result<Vec<Tax>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tax_id, tax_percent, tax_name, valid_from, valid_till
                 FROM taxes ORDER BY tax_id",
            )?;
            let raws = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut taxes = Vec::with_capacity(raws.len());
            for (tax_id, percent, name, from, till) in raws {
                taxes.push(Tax {
                    tax_id: tax_id as i32,
                    tax_percent: opt_dec_from_sql(percent)?,
                    tax_name: name,
                    valid_from: date_from_sql(&from)?,
                    valid_till: till.as_deref().map(date_from_sql).transpose()?,
                });
            }
            Ok(taxes)
        })
        .await
    }

    async fn insert_device(&self, device: &Device) -> Result<i64> {
        let d = device.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO devices (device_id, taxpayer_id, serial_no, model_name,
                     model_version, activation_key, status, operating_mode, certificate_pem,
                     certificate_thumbprint, certificate_valid_till, branch, last_ping)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    d.device_id as i64,
                    d.taxpayer_id,
                    d.serial_no,
                    d.model_name,
                    d.model_version,
                    d.activation_key,
                    d.status.name(),
                    d.operating_mode.name(),
                    d.certificate_pem,
                    d.certificate_thumbprint.map(|t| t.as_bytes().to_vec()),
                    d.certificate_valid_till.map(dt_to_sql),
                    json_to_sql(&d.branch)?,
                    d.last_ping.map(dt_to_sql),
                ],
            )
            .map_err(map_constraint)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_device(&self, device_id: u32) -> Result<Option<Device>> {
        self.with_conn(move |conn| {
            query_device(conn, "device_id = ?1", &[&(device_id as i64)])
        })
        .await
    }

    async fn get_device_by_thumbprint(
        &self,
        thumbprint: &Thumbprint,
    ) -> Result<Option<Device>> {
        let bytes = thumbprint.as_bytes().to_vec();
        self.with_conn(move |conn| {
            query_device(conn, "certificate_thumbprint = ?1", &[&bytes])
        })
        .await
    }

    async fn update_device_certificate(
        &self,
        device_id: u32,
        certificate_pem: &str,
        thumbprint: Thumbprint,
        valid_till: NaiveDateTime,
        issued_at: NaiveDateTime,
    ) -> Result<()> {
        let pem = certificate_pem.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx
                .execute(
                    "UPDATE devices SET certificate_pem = ?2, certificate_thumbprint = ?3,
                         certificate_valid_till = ?4
                     WHERE device_id = ?1",
                    params![
                        device_id as i64,
                        pem,
                        thumbprint.as_bytes().to_vec(),
                        dt_to_sql(valid_till),
                    ],
                )
                .map_err(map_constraint)?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("device {device_id}")));
            }
            tx.execute(
                "INSERT INTO certificates_history (device_id, certificate_pem, thumbprint,
                     valid_till, issued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    device_id as i64,
                    pem,
                    thumbprint.as_bytes().to_vec(),
                    dt_to_sql(valid_till),
                    dt_to_sql(issued_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn certificate_history(&self, device_id: u32) -> Result<Vec<CertificateRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT certificate_pem, thumbprint, valid_till, issued_at
                 FROM certificates_history WHERE device_id = ?1 ORDER BY id",
            )?;
            let raws = stmt
                .query_map(params![device_id as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut records = Vec::with_capacity(raws.len());
            for (pem, thumbprint, valid_till, issued_at) in raws {
                records.push(CertificateRecord {
                    device_id,
                    certificate_pem: pem,
                    thumbprint: thumbprint_from_sql(thumbprint)?,
                    valid_till: dt_from_sql(&valid_till)?,
                    issued_at: dt_from_sql(&issued_at)?,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn update_last_ping(&self, device_id: u32, at: NaiveDateTime) -> Result<()> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE devices SET last_ping = ?2 WHERE device_id = ?1",
                params![device_id as i64, dt_to_sql(at)],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("device {device_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn insert_fiscal_day(&self, day: &FiscalDay) -> Result<i64> {
        let d = day.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO fiscal_days (device_id, day_no, opened_at, closed_at, status,
                     reconciliation_mode, device_signature, server_signature,
                     closing_error_code, last_receipt_global_no)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    d.device_id as i64,
                    d.day_no as i64,
                    dt_to_sql(d.opened_at),
                    d.closed_at.map(dt_to_sql),
                    d.status.name(),
                    d.reconciliation_mode.map(|m| m.name()),
                    d.device_signature
                        .as_ref()
                        .map(json_to_sql)
                        .transpose()?,
                    d.server_signature
                        .as_ref()
                        .map(json_to_sql)
                        .transpose()?,
                    d.closing_error_code,
                    d.last_receipt_global_no.map(|n| n as i64),
                ],
            )
            .map_err(map_constraint)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn current_fiscal_day(&self, device_id: u32) -> Result<Option<FiscalDay>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {DAY_COLUMNS} FROM fiscal_days
                 WHERE device_id = ?1 ORDER BY day_no DESC LIMIT 1"
            );
            let raw = conn
                .query_row(&sql, params![device_id as i64], day_from_row)
                .optional()?;
            raw.map(finish_day).transpose()
        })
        .await
    }

    async fn update_fiscal_day(&self, day: &FiscalDay) -> Result<()> {
        let d = day.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE fiscal_days SET closed_at = ?2, status = ?3,
                     reconciliation_mode = ?4, device_signature = ?5,
                     server_signature = ?6, closing_error_code = ?7,
                     last_receipt_global_no = ?8
                 WHERE id = ?1",
                params![
                    d.id,
                    d.closed_at.map(dt_to_sql),
                    d.status.name(),
                    d.reconciliation_mode.map(|m| m.name()),
                    d.device_signature
                        .as_ref()
                        .map(json_to_sql)
                        .transpose()?,
                    d.server_signature
                        .as_ref()
                        .map(json_to_sql)
                        .transpose()?,
                    d.closing_error_code,
                    d.last_receipt_global_no.map(|n| n as i64),
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("fiscal day {}", d.id)));
            }
            Ok(())
        })
        .await
    }

    async fn reserve_server_receipt_id(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let id: i64 = conn.query_row(
                "UPDATE sequences SET value = value + 1
                 WHERE name = 'server_receipt_id' RETURNING value",
                [],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn insert_receipt(&self, receipt: &StoredReceipt) -> Result<i64> {
        let stored = receipt.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let r = &stored.receipt;

            tx.execute(
                "INSERT INTO receipts (server_receipt_id, operation_id, device_id,
                     fiscal_day_id, taxpayer_id, receipt_type, currency, receipt_counter,
                     receipt_global_no, invoice_no, buyer, notes, receipt_date,
                     credit_debit_ref, credited_receipt_id, lines_tax_inclusive,
                     receipt_total, print_form, device_signature, server_signature,
                     receipt_hash, server_date, validation_color, validation_errors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                params![
                    stored.server_receipt_id,
                    stored.operation_id,
                    r.device_id as i64,
                    stored.fiscal_day_id,
                    stored.taxpayer_id,
                    r.receipt_type.name(),
                    r.currency,
                    r.receipt_counter as i64,
                    r.receipt_global_no as i64,
                    r.invoice_no,
                    r.buyer.as_ref().map(json_to_sql).transpose()?,
                    r.notes,
                    dt_to_sql(r.receipt_date),
                    r.credit_debit_ref.as_ref().map(json_to_sql).transpose()?,
                    r.credit_debit_ref.and_then(|c| c.receipt_id),
                    r.lines_tax_inclusive,
                    dec_to_sql(r.receipt_total),
                    r.print_form.name(),
                    json_to_sql(&r.device_signature)?,
                    stored.server_signature.as_ref().map(json_to_sql).transpose()?,
                    stored.receipt_hash.as_bytes().to_vec(),
                    stored.server_date.map(dt_to_sql),
                    stored.validation_color.map(|c| c.name()),
                    json_to_sql(&stored.validation_errors)?,
                ],
            )
            .map_err(map_constraint)?;
            let rowid = tx.last_insert_rowid();

            for line in &r.lines {
                tx.execute(
                    "INSERT INTO receipt_lines (receipt_id, line_type, line_no, hs_code,
                         line_name, line_price, line_quantity, line_total, tax_code,
                         tax_percent, tax_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        rowid,
                        line.line_type.name(),
                        line.line_no as i64,
                        line.hs_code,
                        line.line_name,
                        line.line_price.map(dec_to_sql),
                        dec_to_sql(line.line_quantity),
                        dec_to_sql(line.line_total),
                        line.tax_code,
                        line.tax_percent.map(dec_to_sql),
                        line.tax_id,
                    ],
                )?;
            }

            for tax in &r.taxes {
                tx.execute(
                    "INSERT INTO receipt_taxes (receipt_id, tax_code, tax_percent, tax_id,
                         tax_amount, sales_amount_with_tax)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        rowid,
                        tax.tax_code,
                        tax.tax_percent.map(dec_to_sql),
                        tax.tax_id,
                        dec_to_sql(tax.tax_amount),
                        dec_to_sql(tax.sales_amount_with_tax),
                    ],
                )?;
            }

            for payment in &r.payments {
                tx.execute(
                    "INSERT INTO receipt_payments (receipt_id, money_type, payment_amount)
                     VALUES (?1, ?2, ?3)",
                    params![
                        rowid,
                        payment.money_type_code.name(),
                        dec_to_sql(payment.payment_amount),
                    ],
                )?;
            }

            // Advance the day cursor; a CloseFailed day reopens on a
            // successful submit.
            tx.execute(
                "UPDATE fiscal_days SET last_receipt_global_no = ?2,
                     status = CASE WHEN status = 'FiscalDayCloseFailed'
                                   THEN 'FiscalDayOpened' ELSE status END,
                     closing_error_code = CASE WHEN status = 'FiscalDayCloseFailed'
                                   THEN NULL ELSE closing_error_code END
                 WHERE id = ?1",
                params![stored.fiscal_day_id, r.receipt_global_no as i64],
            )?;

            tx.commit()?;
            Ok(rowid)
        })
        .await
    }

    async fn get_receipt_by_global_no(
        &self,
        device_id: u32,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>> {
        self.with_conn(move |conn| {
            query_receipt(
                conn,
                "device_id = ?1 AND receipt_global_no = ?2",
                &[&(device_id as i64), &(receipt_global_no as i64)],
            )
        })
        .await
    }

    async fn get_receipt_in_day(
        &self,
        device_id: u32,
        fiscal_day_id: i64,
        receipt_global_no: u32,
    ) -> Result<Option<StoredReceipt>> {
        self.with_conn(move |conn| {
            query_receipt(
                conn,
                "device_id = ?1 AND fiscal_day_id = ?2 AND receipt_global_no = ?3",
                &[&(device_id as i64), &fiscal_day_id, &(receipt_global_no as i64)],
            )
        })
        .await
    }

    async fn get_receipt_by_server_id(
        &self,
        server_receipt_id: i64,
    ) -> Result<Option<StoredReceipt>> {
        self.with_conn(move |conn| {
            query_receipt(conn, "server_receipt_id = ?1", &[&server_receipt_id])
        })
        .await
    }

    async fn receipts_for_day(&self, fiscal_day_id: i64) -> Result<Vec<StoredReceipt>> {
        self.with_conn(move |conn| query_receipts(conn, "fiscal_day_id = ?1", &[&fiscal_day_id]))
            .await
    }

    async fn blocking_receipts_for_day(
        &self,
        fiscal_day_id: i64,
    ) -> Result<Vec<StoredReceipt>> {
        self.with_conn(move |conn| {
            query_receipts(
                conn,
                "fiscal_day_id = ?1 AND validation_color IN ('Red', 'Grey')",
                &[&fiscal_day_id],
            )
        })
        .await
    }

    async fn notes_for_original(
        &self,
        original_server_receipt_id: i64,
    ) -> Result<(Vec<StoredReceipt>, Vec<StoredReceipt>)> {
        self.with_conn(move |conn| {
            let credits = query_receipts(
                conn,
                "credited_receipt_id = ?1 AND receipt_type = 'CreditNote'",
                &[&original_server_receipt_id],
            )?;
            let debits = query_receipts(
                conn,
                "credited_receipt_id = ?1 AND receipt_type = 'DebitNote'",
                &[&original_server_receipt_id],
            )?;
            Ok((credits, debits))
        })
        .await
    }

    async fn insert_counters(
        &self,
        fiscal_day_id: i64,
        counters: &[FiscalCounter],
    ) -> Result<()> {
        let counters = counters.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM fiscal_counters WHERE fiscal_day_id = ?1",
                params![fiscal_day_id],
            )?;
            for counter in &counters {
                if counter.value.is_zero() {
                    continue;
                }
                tx.execute(
                    "INSERT INTO fiscal_counters (fiscal_day_id, counter_type, currency,
                         tax_id, tax_percent, money_type, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        fiscal_day_id,
                        counter.counter_type.name(),
                        counter.currency,
                        counter.tax_id,
                        counter.tax_percent.map(dec_to_sql),
                        counter.money_type.map(|m| m.name()),
                        dec_to_sql(counter.value),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn counters_for_day(&self, fiscal_day_id: i64) -> Result<Vec<FiscalCounter>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT counter_type, currency, tax_id, tax_percent, money_type, value
                 FROM fiscal_counters WHERE fiscal_day_id = ?1
                 ORDER BY counter_type, currency, tax_id, money_type",
            )?;
            let raws = stmt
                .query_map(params![fiscal_day_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut counters = Vec::with_capacity(raws.len());
            for (counter_type, currency, tax_id, percent, money_type, value) in raws {
                counters.push(FiscalCounter {
                    counter_type: parse_name(&counter_type, FiscalCounterType::from_name)?,
                    currency,
                    tax_id: tax_id.map(|t| t as i32),
                    tax_percent: opt_dec_from_sql(percent)?,
                    money_type: money_type
                        .as_deref()
                        .map(|s| parse_name(s, MoneyType::from_name))
                        .transpose()?,
                    value: dec_from_sql(&value)?,
                });
            }
            Ok(counters)
        })
        .await
    }
}

//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system: each migration is a SQL batch
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (?1, datetime('now'))",
                rusqlite::params![version],
            )?;
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: initial schema.
///
/// Monetary amounts are TEXT-encoded decimals so they round-trip
/// exactly; hashes and thumbprints are raw BLOBs; timestamps are
/// `YYYY-MM-DDTHH:MM:SS` strings matching the wire format.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE taxpayers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tin TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            vat_number TEXT,
            status TEXT NOT NULL,
            day_max_hours INTEGER NOT NULL,
            day_end_notification_hours INTEGER NOT NULL,
            qr_url_base TEXT NOT NULL
        );

        CREATE TABLE taxes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tax_id INTEGER NOT NULL,
            tax_percent TEXT,                 -- NULL = exempt
            tax_name TEXT NOT NULL,
            valid_from TEXT NOT NULL,
            valid_till TEXT
        );

        CREATE TABLE devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL UNIQUE,
            taxpayer_id INTEGER NOT NULL REFERENCES taxpayers(id),
            serial_no TEXT NOT NULL,
            model_name TEXT NOT NULL,
            model_version TEXT NOT NULL,
            activation_key TEXT NOT NULL,
            status TEXT NOT NULL,
            operating_mode TEXT NOT NULL,
            certificate_pem TEXT,
            certificate_thumbprint BLOB UNIQUE,   -- 20 bytes
            certificate_valid_till TEXT,
            branch TEXT NOT NULL,                 -- JSON
            last_ping TEXT
        );

        CREATE TABLE certificates_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            certificate_pem TEXT NOT NULL,
            thumbprint BLOB NOT NULL,
            valid_till TEXT NOT NULL,
            issued_at TEXT NOT NULL
        );

        CREATE TABLE fiscal_days (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            day_no INTEGER NOT NULL,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            status TEXT NOT NULL,
            reconciliation_mode TEXT,
            device_signature TEXT,            -- JSON
            server_signature TEXT,            -- JSON
            closing_error_code TEXT,
            last_receipt_global_no INTEGER,
            UNIQUE(device_id, day_no)
        );

        CREATE TABLE receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_receipt_id INTEGER NOT NULL UNIQUE,
            operation_id TEXT NOT NULL,
            device_id INTEGER NOT NULL,
            fiscal_day_id INTEGER NOT NULL,
            taxpayer_id INTEGER NOT NULL,
            receipt_type TEXT NOT NULL,
            currency TEXT NOT NULL,
            receipt_counter INTEGER NOT NULL,
            receipt_global_no INTEGER NOT NULL,
            invoice_no TEXT NOT NULL,
            buyer TEXT,                       -- JSON
            notes TEXT,
            receipt_date TEXT NOT NULL,
            credit_debit_ref TEXT,            -- JSON
            credited_receipt_id INTEGER,      -- extracted for note lookups
            lines_tax_inclusive INTEGER NOT NULL,
            receipt_total TEXT NOT NULL,
            print_form TEXT NOT NULL,
            device_signature TEXT NOT NULL,   -- JSON
            server_signature TEXT,            -- JSON
            receipt_hash BLOB NOT NULL,       -- 32 bytes
            server_date TEXT,
            validation_color TEXT,
            validation_errors TEXT NOT NULL,  -- JSON array
            UNIQUE(device_id, receipt_global_no),
            UNIQUE(taxpayer_id, invoice_no)
        );

        CREATE TABLE receipt_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id INTEGER NOT NULL REFERENCES receipts(id),
            line_type TEXT NOT NULL,
            line_no INTEGER NOT NULL,
            hs_code TEXT,
            line_name TEXT NOT NULL,
            line_price TEXT,
            line_quantity TEXT NOT NULL,
            line_total TEXT NOT NULL,
            tax_code TEXT,
            tax_percent TEXT,
            tax_id INTEGER NOT NULL
        );

        CREATE TABLE receipt_taxes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id INTEGER NOT NULL REFERENCES receipts(id),
            tax_code TEXT,
            tax_percent TEXT,
            tax_id INTEGER NOT NULL,
            tax_amount TEXT NOT NULL,
            sales_amount_with_tax TEXT NOT NULL
        );

        CREATE TABLE receipt_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id INTEGER NOT NULL REFERENCES receipts(id),
            money_type TEXT NOT NULL,
            payment_amount TEXT NOT NULL
        );

        CREATE TABLE fiscal_counters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fiscal_day_id INTEGER NOT NULL REFERENCES fiscal_days(id),
            counter_type TEXT NOT NULL,
            currency TEXT NOT NULL,
            tax_id INTEGER,
            tax_percent TEXT,
            money_type TEXT,
            value TEXT NOT NULL
        );

        CREATE TABLE sequences (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        INSERT INTO sequences (name, value) VALUES ('server_receipt_id', 0);

        CREATE INDEX idx_receipts_day ON receipts(fiscal_day_id);
        CREATE INDEX idx_receipts_device_global ON receipts(device_id, receipt_global_no);
        CREATE INDEX idx_receipts_credited ON receipts(credited_receipt_id);
        CREATE INDEX idx_fiscal_days_device ON fiscal_days(device_id, day_no);
        CREATE INDEX idx_history_device ON certificates_history(device_id);
        "#,
    )?;

    Ok(())
}

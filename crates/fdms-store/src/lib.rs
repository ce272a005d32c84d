//! # FDMS Store
//!
//! Storage abstraction for the fiscal device management service.
//! Provides a trait-based interface for taxpayers, devices, fiscal days,
//! receipts and counters, with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`StoredReceipt`] - A receipt row with its server-side columns
//!
//! ## Design Notes
//!
//! - **Composite atomic writes**: inserting a receipt writes the receipt,
//!   its lines/taxes/payments and the fiscal-day cursor in one
//!   transaction.
//! - **Per-device serialization**: both backends serialize mutations, so
//!   counter and day invariants hold without extra locking at the call
//!   site.
//! - **Uniqueness**: `device_id`, certificate thumbprints,
//!   `(device, day_no)`, `(device, receipt_global_no)` and
//!   `(taxpayer, invoice_no)` are enforced by the backend.

pub mod error;
pub mod memory;
pub mod migration;
pub mod record;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use record::{CertificateRecord, StoredReceipt};
pub use sqlite::SqliteStore;
pub use traits::Store;

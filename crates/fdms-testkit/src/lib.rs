//! # FDMS Testkit
//!
//! Testing utilities for the fiscal device management service.
//!
//! ## Overview
//!
//! - **Fixtures**: a test CA with server keys, a device simulator able
//!   to produce valid CSRs and signatures, and seeded taxpayer/device/
//!   tax data.
//! - **Golden vectors**: canonical encodings with expected SHA-256
//!   digests for cross-implementation verification.
//!
//! ## Example
//!
//! ```rust
//! use fdms_testkit::{DeviceSim, TestPki};
//!
//! let pki = TestPki::generate();
//! let device = DeviceSim::generate();
//! let csr = device.csr(&pki.policy().expected_cn("SN-1", 1001));
//! let issued = pki.ca.issue(&csr, 1001, "SN-1", fdms_testkit::fixtures::t0()).unwrap();
//! assert!(issued.pem.contains("BEGIN CERTIFICATE"));
//! ```

pub mod fixtures;
pub mod vectors;

pub use fixtures::{seed_device, seed_taxes, seed_taxpayer, DeviceSim, TestPki};
pub use vectors::{all_vectors, GoldenVector};

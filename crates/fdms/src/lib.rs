//! # FDMS
//!
//! The fiscal device management service: the server-side counterpart of
//! every fiscal device in the field.
//!
//! [`Fdms`] composes the storage port, the PKI and the validation engine
//! into the device-facing operations:
//!
//! - device lifecycle: verify-taxpayer, registration, certificate
//!   renewal, config, status, ping ([`device`])
//! - the receipt pipeline: admission, dedup, validation, hash chaining,
//!   counter-signing ([`receipt`])
//! - the fiscal-day controller: open, close with Auto/Manual
//!   reconciliation, status ([`fiscal_day`])
//!
//! All clock reads and generated identifiers go through the injectable
//! [`Clock`] and [`IdSource`] so tests run deterministically.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod fiscal_day;
pub mod ids;
pub mod receipt;

use std::sync::Arc;

use fdms_pki::{CertificateAuthority, ServerChain, ServerSigner};
use fdms_store::Store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::FdmsConfig;
pub use device::{
    ConfigResponse, PingResponse, RegisterDeviceRequest, RegisterDeviceResponse,
    RenewCertificateRequest, ServerCertificateResponse, VerifyTaxpayerRequest,
    VerifyTaxpayerResponse,
};
pub use error::{DomainError, ErrorEnvelope, FdmsError, Result};
pub use fiscal_day::{
    CloseDayRequest, CloseDayResponse, DayStatusResponse, OpenDayRequest, OpenDayResponse,
};
pub use ids::{IdSource, RandomIds, SequentialIds};
pub use receipt::{SubmitReceiptRequest, SubmitReceiptResponse};

/// The assembled service. One instance serves every device; requests for
/// distinct devices proceed in parallel, the store serializes per-device
/// mutations.
pub struct Fdms<S> {
    store: Arc<S>,
    ca: CertificateAuthority,
    signer: ServerSigner,
    chain: ServerChain,
    config: FdmsConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
}

impl<S: Store> Fdms<S> {
    pub fn new(
        store: S,
        ca: CertificateAuthority,
        signer: ServerSigner,
        chain: ServerChain,
        config: FdmsConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            ca,
            signer,
            chain,
            config,
            clock,
            ids,
        }
    }

    /// The storage port.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &FdmsConfig {
        &self.config
    }

    pub(crate) fn ca(&self) -> &CertificateAuthority {
        &self.ca
    }

    pub(crate) fn signer(&self) -> &ServerSigner {
        &self.signer
    }

    pub(crate) fn chain(&self) -> &ServerChain {
        &self.chain
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn ids(&self) -> &dyn IdSource {
        self.ids.as_ref()
    }
}

//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests: a throwaway CA
//! with server signing material, a device simulator holding a P-256
//! key, and seed rows.

use chrono::NaiveDateTime;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rust_decimal_macros::dec;

use fdms_core::{
    Address, Branch, Device, DeviceStatus, OperatingMode, SignatureData, Sha256Hash, Tax,
    Taxpayer, TaxpayerStatus,
};
use fdms_pki::{build_csr, CertificateAuthority, CsrPolicy, ServerChain, ServerSigner};

/// The fixture epoch: fiscal days in tests open at this instant.
pub fn t0() -> NaiveDateTime {
    "2026-03-02T08:00:00".parse().unwrap()
}

/// A full PKI setup: CA, server signing key and server chain.
pub struct TestPki {
    pub ca: CertificateAuthority,
    pub signer: ServerSigner,
    pub chain: ServerChain,
}

impl TestPki {
    /// Generate a CA, issue a server certificate under it and wire the
    /// signer to the server key.
    pub fn generate() -> Self {
        let policy = CsrPolicy {
            cn_prefix: "FDMS".into(),
            country: Some("ZW".into()),
            organization: None,
        };
        let ca = CertificateAuthority::generate("FDMS Test CA", policy, 365)
            .expect("generate test CA");

        let server_key = rcgen::KeyPair::generate().expect("server key");
        let csr = build_csr(&server_key, "FDMS-SRV01-0000000001").expect("server csr");
        let issued = ca.issue(&csr, 1, "SRV01", t0()).expect("server cert");

        let signer_pem = SigningKey::from_pkcs8_der(&server_key.serialize_der())
            .expect("server key as p256")
            .to_pkcs8_pem(LineEnding::LF)
            .expect("pem")
            .to_string();
        let signer = ServerSigner::from_pkcs8_pem(&signer_pem).expect("signer");

        let chain = ServerChain::new(issued.pem, ca.cert_pem()).expect("chain");
        Self { ca, signer, chain }
    }

    pub fn policy(&self) -> &CsrPolicy {
        self.ca.policy()
    }
}

/// A simulated fiscal device: one P-256 key used both in CSRs and for
/// receipt signing.
pub struct DeviceSim {
    rcgen_key: rcgen::KeyPair,
    signing_key: SigningKey,
}

impl DeviceSim {
    pub fn generate() -> Self {
        let rcgen_key = rcgen::KeyPair::generate().expect("device key");
        let signing_key =
            SigningKey::from_pkcs8_der(&rcgen_key.serialize_der()).expect("device key as p256");
        Self {
            rcgen_key,
            signing_key,
        }
    }

    /// A CSR carrying the given common name.
    pub fn csr(&self, common_name: &str) -> String {
        build_csr(&self.rcgen_key, common_name).expect("csr")
    }

    /// Sign a canonical byte string the way a device does: SHA-256 hash
    /// declared alongside an ECDSA DER signature.
    pub fn sign(&self, canonical_bytes: &[u8]) -> SignatureData {
        use p256::ecdsa::signature::{SignatureEncoding, Signer};
        let signature: p256::ecdsa::DerSignature = self.signing_key.sign(canonical_bytes);
        SignatureData {
            hash: Sha256Hash::hash(canonical_bytes),
            signature: signature.to_vec(),
        }
    }

    /// A deliberately wrong signature over the bytes, with the correct
    /// declared hash.
    pub fn sign_badly(&self, canonical_bytes: &[u8]) -> SignatureData {
        let mut data = self.sign(canonical_bytes);
        if let Some(byte) = data.signature.last_mut() {
            *byte ^= 0xff;
        }
        data
    }
}

/// A VAT-registered active taxpayer.
pub fn seed_taxpayer() -> Taxpayer {
    Taxpayer {
        id: 0,
        tin: "1234567890".into(),
        name: "Acme Trading Ltd".into(),
        vat_number: Some("220001122".into()),
        status: TaxpayerStatus::Active,
        day_max_hours: 24,
        day_end_notification_hours: 2,
        qr_url_base: "https://fdms.example/receipt".into(),
    }
}

/// An active online device for the taxpayer.
pub fn seed_device(taxpayer_id: i64, device_id: u32) -> Device {
    Device {
        id: 0,
        device_id,
        taxpayer_id,
        serial_no: format!("SN-{device_id}"),
        model_name: "FiscalPro".into(),
        model_version: "2.1".into(),
        activation_key: "A1B2C3D4".into(),
        status: DeviceStatus::Active,
        operating_mode: OperatingMode::Online,
        certificate_pem: None,
        certificate_thumbprint: None,
        certificate_valid_till: None,
        branch: Branch {
            name: "Main Branch".into(),
            address: Address {
                province: "Harare".into(),
                city: "Harare".into(),
                street: "Samora Machel Ave".into(),
                house_no: "14".into(),
            },
            contacts: None,
        },
        last_ping: None,
    }
}

/// The standard 15% tax plus an exempt entry, both open-ended.
pub fn seed_taxes() -> Vec<Tax> {
    vec![
        Tax {
            tax_id: 1,
            tax_percent: Some(dec!(15)),
            tax_name: "Standard rated 15%".into(),
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
        Tax {
            tax_id: 3,
            tax_percent: Some(dec!(0)),
            tax_name: "Zero rated 0%".into(),
            valid_from: "2020-01-01".parse().unwrap(),
            valid_till: None,
        },
    ]
}

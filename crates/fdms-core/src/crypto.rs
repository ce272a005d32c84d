//! Hashes, thumbprints and signature containers.
//!
//! Wraps SHA-256 chain hashes and SHA-1 certificate thumbprints with
//! strong types. Key material and signing live in `fdms-pki`; this module
//! is pure data.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 hash. The unit of the receipt chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// Compute the SHA-256 hash of data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({}...)", &self.to_hex()[..8])
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Sha256Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 20-byte SHA-1 digest of a certificate's DER encoding.
///
/// The stable device identifier at the TLS layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thumbprint(pub [u8; 20]);

impl Thumbprint {
    /// Compute the thumbprint of a DER-encoded certificate.
    pub fn of_der(der: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(der);
        Self(hasher.finalize().into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Thumbprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A hash plus the signature over it, as produced by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    /// SHA-256 over the canonical encoding, as computed by the signer.
    pub hash: Sha256Hash,
    /// Signature bytes: RSA PKCS#1 v1.5 or ECDSA P-256 ASN.1 DER.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// A server counter-signature: hash, signature and the signing
/// certificate's thumbprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSignature {
    pub hash: Sha256Hash,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    #[serde(rename = "certificateThumbprint")]
    pub thumbprint: Thumbprint,
}

/// Base64 transport encoding for raw signature bytes.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Standard base64 encoding of signature bytes, used when building the
/// server counter-signature input.
pub fn base64_signature(signature: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_deterministic() {
        let h1 = Sha256Hash::hash(b"test data");
        let h2 = Sha256Hash::hash(b"test data");
        assert_eq!(h1, h2);
        assert_ne!(h1, Sha256Hash::hash(b"different"));
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        let h = Sha256Hash::hash(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha1_known_vector() {
        // SHA-1("abc")
        let t = Thumbprint::of_der(b"abc");
        assert_eq!(t.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = Sha256Hash::hash(b"roundtrip");
        assert_eq!(Sha256Hash::from_hex(&h.to_hex()), Some(h));
        assert_eq!(Sha256Hash::from_hex("zz"), None);
    }

    #[test]
    fn base64_known_vectors() {
        // RFC 4648 vectors
        assert_eq!(base64_signature(b""), "");
        assert_eq!(base64_signature(b"f"), "Zg==");
        assert_eq!(base64_signature(b"fo"), "Zm8=");
        assert_eq!(base64_signature(b"foo"), "Zm9v");
        assert_eq!(base64_signature(b"foob"), "Zm9vYg==");
        assert_eq!(base64_signature(b"fooba"), "Zm9vYmE=");
        assert_eq!(base64_signature(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn signature_data_json_roundtrip() {
        let sig = SignatureData {
            hash: Sha256Hash::hash(b"payload"),
            signature: vec![1, 2, 3, 4, 5],
        };
        let json = serde_json::to_string(&sig).unwrap();
        let back: SignatureData = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
    }
}

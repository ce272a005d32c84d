//! Injected identifier generators.
//!
//! Operation ids and activation keys come from an [`IdSource`] wired at
//! init: the OS random source in production, a sequential source in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use fdms_core::ACTIVATION_KEY_LEN;

const ACTIVATION_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of generated identifiers.
pub trait IdSource: Send + Sync {
    /// An opaque unique token threading one operation through responses
    /// and logs.
    fn operation_id(&self) -> String;

    /// An 8-character device activation key.
    fn activation_key(&self) -> String;
}

/// Production source: UUIDv4 operation ids, crypto-random keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn operation_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn activation_key(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..ACTIVATION_KEY_LEN)
            .map(|_| {
                let i = rng.gen_range(0..ACTIVATION_KEY_CHARSET.len());
                ACTIVATION_KEY_CHARSET[i] as char
            })
            .collect()
    }
}

/// Deterministic source for tests: `op-1`, `op-2`, …
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn operation_id(&self) -> String {
        format!("op-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn activation_key(&self) -> String {
        "A1B2C3D4".into()
    }
}

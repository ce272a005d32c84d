//! Error types and the protocol error-code families.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from pure-core computation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("malformed receipt: {0}")]
    MalformedReceipt(String),

    #[error("unknown enum name: {0}")]
    UnknownName(String),
}

/// Client-visible error codes.
///
/// `DEV` covers device/auth, `FISC` the fiscal-day lifecycle, `RCPT`
/// submission, `FILE` the reserved offline batch path and `USER` the
/// non-core user plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Device / auth
    Dev01,
    Dev02,
    Dev03,
    Dev04,
    Dev05,
    Dev06,
    Dev07,
    Dev08,
    Dev09,
    Dev10,

    // Fiscal day
    Fisc01,
    Fisc02,
    Fisc03,
    Fisc04,

    // Receipt submission
    Rcpt01,
    Rcpt02,
    Rcpt03,
    Rcpt04,
    Rcpt05,

    // Offline batch path, reserved
    File01,
    File02,
    File03,
    File04,
    File05,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev01 => "DEV01",
            Self::Dev02 => "DEV02",
            Self::Dev03 => "DEV03",
            Self::Dev04 => "DEV04",
            Self::Dev05 => "DEV05",
            Self::Dev06 => "DEV06",
            Self::Dev07 => "DEV07",
            Self::Dev08 => "DEV08",
            Self::Dev09 => "DEV09",
            Self::Dev10 => "DEV10",
            Self::Fisc01 => "FISC01",
            Self::Fisc02 => "FISC02",
            Self::Fisc03 => "FISC03",
            Self::Fisc04 => "FISC04",
            Self::Rcpt01 => "RCPT01",
            Self::Rcpt02 => "RCPT02",
            Self::Rcpt03 => "RCPT03",
            Self::Rcpt04 => "RCPT04",
            Self::Rcpt05 => "RCPT05",
            Self::File01 => "FILE01",
            Self::File02 => "FILE02",
            Self::File03 => "FILE03",
            Self::File04 => "FILE04",
            Self::File05 => "FILE05",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

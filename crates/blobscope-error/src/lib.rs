//! Error taxonomy shared by every blobscope crate.
//!
//! Failures fall into four classes:
//! - [`AuditError::Decode`]: a malformed or unrecognized-version structure.
//!   Log scanning recovers from it by resynchronizing; whole-file readers
//!   treat it as fatal for that file.
//! - [`AuditError::EndOfInput`]: fewer bytes remain than a structure needs.
//!   Always fatal for the read in progress, never resynchronized.
//! - [`AuditError::Config`]: missing or contradictory configuration, raised
//!   before any file I/O.
//! - [`AuditError::Io`]: the operating system refused a read or write.
//!
//! Logically unexpected but well-formed observations (put after delete,
//! key-size mismatch, ...) are not errors; see `blobscope_types::Anomaly`.

use thiserror::Error;

/// Primary error type for blobscope operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Structure at `offset` could not be decoded.
    #[error("decode failure at offset {offset}: {detail}")]
    Decode { offset: u64, detail: String },

    /// Input ended while a structure still needed bytes.
    #[error(
        "unexpected end of input at offset {offset}: needed {needed} bytes, {available} available"
    )]
    EndOfInput {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// Required configuration is missing or inconsistent.
    #[error("configuration error: {detail}")]
    Config { detail: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Create a decode failure at `offset`.
    pub fn decode(offset: u64, detail: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Whether this is an end-of-input condition.
    #[must_use]
    pub const fn is_end_of_input(&self) -> bool {
        matches!(self, Self::EndOfInput { .. })
    }

    /// Whether a byte-wise scanner may skip past this failure and retry.
    ///
    /// Only decode failures qualify: end of input, configuration and I/O
    /// errors end the operation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Offset at which the failure was detected, when it has one.
    #[must_use]
    pub const fn offset(&self) -> Option<u64> {
        match self {
            Self::Decode { offset, .. } | Self::EndOfInput { offset, .. } => Some(*offset),
            Self::Config { .. } | Self::Io(_) => None,
        }
    }

    /// Process exit code for a CLI that terminates on this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Decode { .. } | Self::EndOfInput { .. } | Self::Io(_) => 1,
        }
    }
}

/// Result type alias using [`AuditError`].
pub type Result<T> = std::result::Result<T, AuditError>;

//! CRC-32C helpers for record and file trailers.
//!
//! Every trailer stores the 32-bit CRC zero-extended into an `int64`.

use blobscope_error::Result;
use blobscope_types::{Anomaly, ByteCursor};
use serde::Serialize;

/// Bytes occupied by a CRC trailer.
pub const CRC_SIZE: usize = 8;

/// CRC-32C of `bytes`, widened the way trailers store it.
#[must_use]
pub fn trailer_crc(bytes: &[u8]) -> u64 {
    u64::from(crc32c::crc32c(bytes))
}

/// Append the trailer for `bytes[from..]` to `bytes`.
#[cfg(any(test, feature = "fixtures"))]
pub fn append_trailer(bytes: &mut Vec<u8>, from: usize) {
    let crc = trailer_crc(&bytes[from..]);
    bytes.extend_from_slice(&crc.to_be_bytes());
}

/// Read a trailer covering everything consumed since `start` and require it
/// to match. A mismatch is a decode failure stamped at `start`.
pub fn expect_trailer(cursor: &mut ByteCursor<'_>, start: usize, what: &str) -> Result<()> {
    let computed = trailer_crc(cursor.consumed_since(start));
    let stored = cursor.read_u64()?;
    if stored != computed {
        return Err(cursor.decode_error(
            start,
            format!("{what} crc mismatch: stored {stored:#010x}, computed {computed:#010x}"),
        ));
    }
    Ok(())
}

/// Whole-file trailer: the stored CRC and the one computed over the file.
///
/// Index and replica-token files report a mismatch as an anomaly instead of
/// failing the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileTrailer {
    pub stored: u64,
    pub computed: u64,
}

impl FileTrailer {
    /// Read the trailer at the cursor; it covers `covered` (everything before it).
    pub fn read(cursor: &mut ByteCursor<'_>, covered: &[u8]) -> Result<Self> {
        let stored = cursor.read_u64()?;
        Ok(Self {
            stored,
            computed: trailer_crc(covered),
        })
    }

    #[must_use]
    pub const fn matches(&self) -> bool {
        self.stored == self.computed
    }

    /// Anomaly describing a mismatch in `artifact`, if any.
    #[must_use]
    pub fn checksum_anomaly(&self, artifact: &str) -> Option<Anomaly> {
        (!self.matches()).then(|| Anomaly::ChecksumMismatch {
            artifact: artifact.to_owned(),
            stored: self.stored,
            computed: self.computed,
        })
    }
}

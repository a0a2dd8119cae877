//! Index snapshot entries.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::key::StoreKey;

bitflags! {
    /// Per-entry flag byte. Unknown bits are retained and rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct IndexFlags: u8 {
        const DELETE = 0b0000_0001;
    }
}

/// Location and state of the most recent record for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexValue {
    pub log_offset: i64,
    pub size: i64,
    /// `-1` when the snapshot's value layout does not carry it.
    pub original_message_offset: i64,
    pub flags: IndexFlags,
    /// Absolute expiry in epoch milliseconds; `None` never expires.
    pub expires_at_ms: Option<u64>,
}

impl IndexValue {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.flags.contains(IndexFlags::DELETE)
    }

    /// Expired strictly before `now_ms`.
    #[must_use]
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at_ms {
            Some(expiry) => expiry < now_ms,
            None => false,
        }
    }

    #[must_use]
    pub const fn is_deleted_or_expired(&self, now_ms: u64) -> bool {
        self.is_deleted() || self.is_expired(now_ms)
    }

    /// Expiry as printed in reports (`-1` for never).
    #[must_use]
    pub fn live_until(&self) -> i64 {
        self.expires_at_ms
            .map_or(-1, |expiry| i64::try_from(expiry).unwrap_or(i64::MAX))
    }
}

/// One `(key, value)` pair of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub key: StoreKey,
    pub value: IndexValue,
    /// Offset of the entry's key inside the snapshot file.
    pub file_offset: u64,
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key {} keySize(in bytes) {} value - offset {} size {} Original Message Offset {} Flag {} LiveUntil {}",
            self.key,
            self.key.encoded_len(),
            self.value.log_offset,
            self.value.size,
            self.value.original_message_offset,
            self.value.is_deleted(),
            self.value.live_until()
        )?;
        let other = self.value.flags.difference(IndexFlags::DELETE).bits();
        if other != 0 {
            write!(f, " OtherFlags {other:#04x}")?;
        }
        Ok(())
    }
}

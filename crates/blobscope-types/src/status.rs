//! Per-key replica state and the anomalies observed while folding it.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Which replicas hold a key live, and which have seen it deleted or expired.
///
/// A replica moving from `deleted_or_expired` back to `available` is not
/// rejected; the aggregator reports it as [`Anomaly::PutAfterDelete`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlobStatus {
    pub available: BTreeSet<String>,
    pub deleted_or_expired: BTreeSet<String>,
}

impl BlobStatus {
    /// Status for the first sighting of a key on `replica`.
    #[must_use]
    pub fn seeded(replica: &str, deleted_or_expired: bool) -> Self {
        let mut status = Self::default();
        if deleted_or_expired {
            status.deleted_or_expired.insert(replica.to_owned());
        } else {
            status.available.insert(replica.to_owned());
        }
        status
    }

    #[must_use]
    pub fn is_available_on(&self, replica: &str) -> bool {
        self.available.contains(replica)
    }

    #[must_use]
    pub fn is_deleted_or_expired_on(&self, replica: &str) -> bool {
        self.deleted_or_expired.contains(replica)
    }
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        write!(
            f,
            "available [{}] deletedOrExpired [{}]",
            join(&self.available),
            join(&self.deleted_or_expired)
        )
    }
}

/// Structurally valid but logically unexpected observation.
///
/// Anomalies are counted and reported; they never stop a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A put for `key` on `replica` after that replica saw it deleted or expired.
    PutAfterDelete { key: String, replica: String },
    /// A put for a key the active-blob set already retired.
    PutAfterRemoval { key: String },
    /// A second live entry for a key already tracked as active.
    DuplicatePut { key: String },
    /// A key's encoded size differs from the snapshot's declared key size.
    KeySizeMismatch {
        key: String,
        declared: u32,
        actual: usize,
        file_offset: u64,
    },
    /// The log record at an index entry's offset carries a different key.
    KeyMismatch {
        index_key: String,
        log_key: String,
        log_offset: u64,
    },
    /// A file's CRC trailer does not match its contents.
    ChecksumMismatch {
        artifact: String,
        stored: u64,
        computed: u64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PutAfterDelete { key, replica } => {
                write!(f, "Put Record found after delete record for {replica} (key {key})")
            }
            Self::PutAfterRemoval { key } => {
                write!(f, "Put record found for {key} after it was deleted or expired")
            }
            Self::DuplicatePut { key } => write!(f, "Duplicate put record found for {key}"),
            Self::KeySizeMismatch {
                key,
                declared,
                actual,
                file_offset,
            } => write!(
                f,
                "KeySize mismatch for key {key}: declared {declared}, actual {actual} (at {file_offset})"
            ),
            Self::KeyMismatch {
                index_key,
                log_key,
                log_offset,
            } => write!(
                f,
                "BlobId did not match the index value. BlobId from index {index_key}, blobid in log {log_key} (log offset {log_offset})"
            ),
            Self::ChecksumMismatch {
                artifact,
                stored,
                computed,
            } => write!(
                f,
                "crc mismatch in {artifact}: stored {stored:#010x}, computed {computed:#010x}"
            ),
        }
    }
}

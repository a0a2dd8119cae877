//! Decoded segment-log records.

use std::fmt;

use serde::Serialize;

use crate::key::StoreKey;

/// Relative-offset value marking "no such sub-record" (delete records).
pub const SENTINEL_INVALID: i64 = -1;

/// Fixed part of a log message, as found at the start of every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    pub version: i16,
    /// Encoded size of the header itself.
    pub header_size: u64,
    /// Bytes following the header+key region.
    pub message_size: i64,
    pub blob_props_rel_offset: i64,
    pub user_metadata_rel_offset: i64,
    pub blob_data_rel_offset: i64,
    pub crc: i64,
}

impl MessageHeader {
    /// Whether this header announces a put (properties, metadata and data).
    #[must_use]
    pub const fn is_put(&self) -> bool {
        self.blob_props_rel_offset != SENTINEL_INVALID
    }
}

/// Blob properties sub-record of a put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobProperties {
    pub blob_size: i64,
    pub ttl_seconds: i64,
    pub is_private: bool,
    pub creation_time_ms: i64,
    pub service_id: String,
    pub owner_id: String,
    pub content_type: String,
}

/// What follows the key: either the three put sub-records or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordBody {
    Put {
        properties: BlobProperties,
        metadata_size: u64,
        data_size: u64,
    },
    Delete {
        delete_flag: bool,
    },
}

/// One record decoded from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Absolute offset of the first header byte.
    pub offset: u64,
    pub header: MessageHeader,
    pub key: StoreKey,
    pub body: RecordBody,
}

impl LogRecord {
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self.body, RecordBody::Delete { .. })
    }

    #[must_use]
    pub fn encoded_key_size(&self) -> u64 {
        self.key.encoded_len() as u64
    }

    /// `headerSize + messageSize + encodedKeySize`.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.header.header_size + self.header.message_size.max(0) as u64 + self.encoded_key_size()
    }

    /// Offset of the record that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.offset + self.total_size()
    }

    #[must_use]
    pub fn blob_size(&self) -> Option<i64> {
        match &self.body {
            RecordBody::Put { properties, .. } => Some(properties.blob_size),
            RecordBody::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        match &self.body {
            RecordBody::Put { properties, .. } => Some(&properties.service_id),
            RecordBody::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn metadata_size(&self) -> Option<u64> {
        match &self.body {
            RecordBody::Put { metadata_size, .. } => Some(*metadata_size),
            RecordBody::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn delete_flag(&self) -> Option<bool> {
        match &self.body {
            RecordBody::Put { .. } => None,
            RecordBody::Delete { delete_flag } => Some(*delete_flag),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = &self.header;
        writeln!(
            f,
            "Header - version {} messagesize {} currentOffset {} blobPropertiesRelativeOffset {} \
             userMetadataRelativeOffset {} dataRelativeOffset {} crc {}",
            header.version,
            header.message_size,
            self.offset,
            header.blob_props_rel_offset,
            header.user_metadata_rel_offset,
            header.blob_data_rel_offset,
            header.crc
        )?;
        write!(f, " Id - {}", self.key)?;
        match &self.body {
            RecordBody::Put {
                properties,
                metadata_size,
                data_size,
            } => write!(
                f,
                "\n Blob properties - blobSize {} serviceId {}\n Metadata - size {metadata_size}\n Blob - size {data_size}",
                properties.blob_size, properties.service_id
            ),
            RecordBody::Delete { delete_flag } => write!(f, "\n delete change {delete_flag}"),
        }
    }
}

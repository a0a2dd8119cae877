//! Writers for every format the decoders read.
//!
//! The auditor never writes the artifacts it inspects; these encoders exist to
//! build fixtures for tests and reproductions.

use blobscope_types::{BlobProperties, DefaultPartitionResolver, IndexValue, SENTINEL_INVALID};

use crate::checksum::append_trailer;
use crate::codec::{MESSAGE_HEADER_VERSION_V1, SUB_RECORD_VERSION_V1};
use crate::index::{INDEX_VALUE_WITH_ORIGINAL_OFFSET_SIZE, INDEX_VERSION_V0, NEVER_EXPIRES};
use crate::replica_token::{REPLICA_TOKEN_VERSION_V0, STORE_FIND_TOKEN_VERSION_V0};

pub fn int_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as i32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Properties with fixed service, owner and content type.
#[must_use]
pub fn sample_properties(blob_size: i64) -> BlobProperties {
    BlobProperties {
        blob_size,
        ttl_seconds: -1,
        is_private: false,
        creation_time_ms: 1_700_000_000_000,
        service_id: "svc".to_owned(),
        owner_id: "owner".to_owned(),
        content_type: "application/octet-stream".to_owned(),
    }
}

#[must_use]
pub fn message_header(message_size: i64, props: i64, metadata: i64, data: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(42);
    out.extend_from_slice(&MESSAGE_HEADER_VERSION_V1.to_be_bytes());
    for field in [message_size, props, metadata, data] {
        out.extend_from_slice(&field.to_be_bytes());
    }
    append_trailer(&mut out, 0);
    out
}

#[must_use]
pub fn blob_properties(properties: &BlobProperties) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SUB_RECORD_VERSION_V1.to_be_bytes());
    out.extend_from_slice(&properties.blob_size.to_be_bytes());
    out.extend_from_slice(&properties.ttl_seconds.to_be_bytes());
    out.push(u8::from(properties.is_private));
    out.extend_from_slice(&properties.creation_time_ms.to_be_bytes());
    int_string(&mut out, &properties.service_id);
    int_string(&mut out, &properties.owner_id);
    int_string(&mut out, &properties.content_type);
    append_trailer(&mut out, 0);
    out
}

#[must_use]
pub fn user_metadata(metadata: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(metadata.len() + 14);
    out.extend_from_slice(&SUB_RECORD_VERSION_V1.to_be_bytes());
    out.extend_from_slice(&(metadata.len() as i32).to_be_bytes());
    out.extend_from_slice(metadata);
    append_trailer(&mut out, 0);
    out
}

#[must_use]
pub fn blob(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 18);
    out.extend_from_slice(&SUB_RECORD_VERSION_V1.to_be_bytes());
    out.extend_from_slice(&(data.len() as i64).to_be_bytes());
    out.extend_from_slice(data);
    append_trailer(&mut out, 0);
    out
}

#[must_use]
pub fn delete_marker(flag: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.extend_from_slice(&SUB_RECORD_VERSION_V1.to_be_bytes());
    out.push(u8::from(flag));
    append_trailer(&mut out, 0);
    out
}

/// A complete put record: header, key, properties, metadata and data.
#[must_use]
pub fn put_record(key: &[u8], properties: &BlobProperties, metadata: &[u8], data: &[u8]) -> Vec<u8> {
    let props = blob_properties(properties);
    let meta = user_metadata(metadata);
    let data = blob(data);
    let message_size = (props.len() + meta.len() + data.len()) as i64;

    let mut out = message_header(
        message_size,
        0,
        props.len() as i64,
        (props.len() + meta.len()) as i64,
    );
    out.extend_from_slice(key);
    out.extend(props);
    out.extend(meta);
    out.extend(data);
    out
}

#[must_use]
pub fn delete_record(key: &[u8], flag: bool) -> Vec<u8> {
    let marker = delete_marker(flag);
    let mut out = message_header(
        marker.len() as i64,
        SENTINEL_INVALID,
        SENTINEL_INVALID,
        SENTINEL_INVALID,
    );
    out.extend_from_slice(key);
    out.extend(marker);
    out
}

/// Value region of `value_size` bytes; bytes past the known fields are zero.
#[must_use]
pub fn encode_index_value(value: &IndexValue, value_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(value_size);
    out.extend_from_slice(&value.log_offset.to_be_bytes());
    out.extend_from_slice(&value.size.to_be_bytes());
    let expiry = value.expires_at_ms.map_or(NEVER_EXPIRES, |ms| ms & NEVER_EXPIRES);
    let packed = (u64::from(value.flags.bits()) << 56) | expiry;
    out.extend_from_slice(&packed.to_be_bytes());
    if value_size >= INDEX_VALUE_WITH_ORIGINAL_OFFSET_SIZE {
        out.extend_from_slice(&value.original_message_offset.to_be_bytes());
    }
    out.resize(value_size.max(out.len()), 0);
    out
}

/// Builds a v0 index snapshot file.
#[derive(Debug, Clone)]
pub struct IndexSnapshotBuilder {
    key_size: i32,
    value_size: i32,
    file_end_pointer: i64,
    body: Vec<u8>,
}

impl IndexSnapshotBuilder {
    #[must_use]
    pub const fn new(key_size: i32, value_size: i32) -> Self {
        Self {
            key_size,
            value_size,
            file_end_pointer: 0,
            body: Vec::new(),
        }
    }

    #[must_use]
    pub const fn file_end_pointer(mut self, pointer: i64) -> Self {
        self.file_end_pointer = pointer;
        self
    }

    /// Append `key` as given, whatever the declared key size.
    #[must_use]
    pub fn entry(mut self, key: &[u8], value: &IndexValue) -> Self {
        self.body.extend_from_slice(key);
        self.body
            .extend(encode_index_value(value, self.value_size.max(0) as usize));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + self.body.len() + 8);
        out.extend_from_slice(&INDEX_VERSION_V0.to_be_bytes());
        out.extend_from_slice(&self.key_size.to_be_bytes());
        out.extend_from_slice(&self.value_size.to_be_bytes());
        out.extend_from_slice(&self.file_end_pointer.to_be_bytes());
        out.extend(self.body);
        append_trailer(&mut out, 0);
        out
    }
}

#[must_use]
pub fn encode_store_find_token(session_id: &str, log_offset: i64, store_key: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&STORE_FIND_TOKEN_VERSION_V0.to_be_bytes());
    int_string(&mut out, session_id);
    out.extend_from_slice(&log_offset.to_be_bytes());
    match store_key {
        Some(key) => {
            out.push(1);
            out.extend_from_slice(key);
        }
        None => out.push(0),
    }
    out
}

/// Builds a v0 replica token file with [`DefaultPartitionResolver`] partitions.
#[derive(Debug, Clone, Default)]
pub struct ReplicaTokenFileBuilder {
    body: Vec<u8>,
}

impl ReplicaTokenFileBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn record(
        mut self,
        partition: i64,
        hostname: &str,
        replica_path: &str,
        port: i32,
        total_bytes_read: i64,
        token: &[u8],
    ) -> Self {
        self.body.extend(DefaultPartitionResolver::encode(partition));
        int_string(&mut self.body, hostname);
        int_string(&mut self.body, replica_path);
        self.body.extend_from_slice(&port.to_be_bytes());
        self.body.extend_from_slice(&total_bytes_read.to_be_bytes());
        self.body.extend_from_slice(token);
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = REPLICA_TOKEN_VERSION_V0.to_be_bytes().to_vec();
        out.extend(self.body);
        append_trailer(&mut out, 0);
        out
    }
}

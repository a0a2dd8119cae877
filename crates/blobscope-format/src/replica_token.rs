//! Replication cursor ("replica token") files.
//!
//! Layout: `version:int16 (=0) | record* | crc:int64`, one record per remote
//! peer. The token inside each record is decoded by a [`TokenCodec`] chosen by
//! the file version.

use std::fmt;
use std::fs;
use std::path::Path;

use blobscope_error::Result;
use blobscope_types::{
    ByteCursor, KeyCodec, OpaqueToken, PartitionResolver, ReplicaTokenRecord,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::{CRC_SIZE, FileTrailer};

const TARGET: &str = "blobscope.format::replica_token";

/// The only cursor file version defined.
pub const REPLICA_TOKEN_VERSION_V0: i16 = 0;
/// Version of the store find token nested in a v0 cursor file.
pub const STORE_FIND_TOKEN_VERSION_V0: i16 = 0;

/// Token layouts a cursor file version can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    StoreFindTokenV0,
}

impl TokenKind {
    /// Token kind carried by cursor files of `version`.
    #[must_use]
    pub const fn for_cursor_version(version: i16) -> Option<Self> {
        match version {
            REPLICA_TOKEN_VERSION_V0 => Some(Self::StoreFindTokenV0),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoreFindTokenV0 => "store_find_token_v0",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decodes the opaque token of one cursor record.
pub trait TokenCodec: fmt::Debug {
    fn decode_token(&self, kind: TokenKind, cursor: &mut ByteCursor<'_>) -> Result<OpaqueToken>;
}

/// `version:int16 (=0) | sessionId:int-string | logOffset:int64 | hasStoreKey:u8 | storeKey?`.
#[derive(Debug, Clone, Copy)]
pub struct StoreFindTokenCodec<'k> {
    keys: &'k dyn KeyCodec,
}

impl<'k> StoreFindTokenCodec<'k> {
    pub const fn new(keys: &'k dyn KeyCodec) -> Self {
        Self { keys }
    }
}

impl TokenCodec for StoreFindTokenCodec<'_> {
    fn decode_token(&self, kind: TokenKind, cursor: &mut ByteCursor<'_>) -> Result<OpaqueToken> {
        let start = cursor.position();
        match kind {
            TokenKind::StoreFindTokenV0 => {
                let version = cursor.read_i16()?;
                if version != STORE_FIND_TOKEN_VERSION_V0 {
                    return Err(cursor.decode_error(
                        start,
                        format!("store find token version {version} not supported"),
                    ));
                }
                let session_id = cursor.read_int_string()?;
                let log_offset = cursor.read_i64()?;
                let store_key = if cursor.read_bool()? {
                    Some(self.keys.decode_key(cursor)?)
                } else {
                    None
                };
                let store_key = store_key.map_or_else(|| "none".to_owned(), |key| key.id());
                Ok(OpaqueToken {
                    kind: kind.to_string(),
                    description: format!(
                        "version {version} sessionId {session_id} logOffset {log_offset} storeKey {store_key}"
                    ),
                    encoded_len: cursor.consumed_since(start).len(),
                })
            }
        }
    }
}

/// Streaming reader over a cursor file, see the module docs.
///
/// Iteration stops after the first error.
#[derive(Debug)]
pub struct ReplicaTokenReader<'c> {
    bytes: Vec<u8>,
    pos: usize,
    version: i16,
    kind: TokenKind,
    resolver: &'c dyn PartitionResolver,
    tokens: &'c dyn TokenCodec,
    records: u64,
    failed: bool,
}

/// Trailer and record count of a fully read cursor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplicaTokenTrailer {
    pub crc: FileTrailer,
    pub records: u64,
}

impl<'c> ReplicaTokenReader<'c> {
    pub fn new(
        bytes: Vec<u8>,
        resolver: &'c dyn PartitionResolver,
        tokens: &'c dyn TokenCodec,
    ) -> Result<Self> {
        let mut cursor = ByteCursor::new(&bytes, 0);
        let version = cursor.read_i16()?;
        let kind = TokenKind::for_cursor_version(version).ok_or_else(|| {
            cursor.decode_error(0, format!("replica token version {version} not supported"))
        })?;
        let pos = cursor.position();
        debug!(target: TARGET, version, token_kind = %kind, "read replica token header");
        Ok(Self {
            bytes,
            pos,
            version,
            kind,
            resolver,
            tokens,
            records: 0,
            failed: false,
        })
    }

    pub fn open(
        path: &Path,
        resolver: &'c dyn PartitionResolver,
        tokens: &'c dyn TokenCodec,
    ) -> Result<Self> {
        info!(target: TARGET, path = %path.display(), "opening replica token file");
        Self::new(fs::read(path)?, resolver, tokens)
    }

    #[must_use]
    pub const fn version(&self) -> i16 {
        self.version
    }

    fn decode_record(&mut self) -> Result<ReplicaTokenRecord> {
        let mut cursor = ByteCursor::new(&self.bytes[self.pos..], self.pos as u64);
        let partition_id = self.resolver.resolve_partition_id(&mut cursor)?;
        let remote_hostname = cursor.read_int_string()?;
        let remote_replica_path = cursor.read_int_string()?;
        let remote_port = cursor.read_i32()?;
        let total_bytes_read_from_local_store = cursor.read_i64()?;
        let token = self.tokens.decode_token(self.kind, &mut cursor)?;
        self.pos += cursor.position();
        Ok(ReplicaTokenRecord {
            partition_id,
            remote_hostname,
            remote_replica_path,
            remote_port,
            total_bytes_read_from_local_store,
            token,
        })
    }

    pub fn finish(self) -> Result<ReplicaTokenTrailer> {
        let mut cursor = ByteCursor::new(&self.bytes[self.pos..], self.pos as u64);
        let crc = FileTrailer::read(&mut cursor, &self.bytes[..self.pos])?;
        if !crc.matches() {
            warn!(
                target: TARGET,
                stored = crc.stored,
                computed = crc.computed,
                "replica token crc mismatch"
            );
        }
        info!(target: TARGET, records = self.records, "read replica token file");
        Ok(ReplicaTokenTrailer {
            crc,
            records: self.records,
        })
    }
}

impl Iterator for ReplicaTokenReader<'_> {
    type Item = Result<ReplicaTokenRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bytes.len() - self.pos <= CRC_SIZE {
            return None;
        }
        let result = self.decode_record();
        match &result {
            Ok(_) => self.records += 1,
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Every record and the trailer of an in-memory cursor file.
pub fn decode_replica_token_file(
    bytes: Vec<u8>,
    resolver: &dyn PartitionResolver,
    tokens: &dyn TokenCodec,
) -> Result<(Vec<ReplicaTokenRecord>, ReplicaTokenTrailer)> {
    let mut reader = ReplicaTokenReader::new(bytes, resolver, tokens)?;
    let records = reader.by_ref().collect::<Result<Vec<_>>>()?;
    Ok((records, reader.finish()?))
}

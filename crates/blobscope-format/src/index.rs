//! Index snapshot reader.
//!
//! Layout: `version:int16 | keySize:int32 | valueSize:int32 | fileEndPointer:int64
//! | {key | value}* | crc:int64`. Entries are decoded while more than the
//! trailer's 8 bytes remain; the last 8 bytes are always the trailer.
//!
//! Index files are never scanned byte-wise: any decode failure ends the file.

use std::fs;
use std::path::Path;

use blobscope_error::Result;
use blobscope_types::{Anomaly, ByteCursor, IndexEntry, IndexFlags, IndexValue, KeyCodec};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::{CRC_SIZE, FileTrailer};

const TARGET: &str = "blobscope.format::index";

/// The only snapshot version defined.
pub const INDEX_VERSION_V0: i16 = 0;
/// `version + keySize + valueSize + fileEndPointer`.
pub const INDEX_HEADER_SIZE: usize = 2 + 4 + 4 + 8;
/// `logOffset + size + flagsAndExpiry`.
pub const INDEX_VALUE_MIN_SIZE: usize = 24;
/// Value size from which `originalMessageOffset` is present.
pub const INDEX_VALUE_WITH_ORIGINAL_OFFSET_SIZE: usize = 32;
/// Expiry field value meaning "never expires".
pub const NEVER_EXPIRES: u64 = 0x00FF_FFFF_FFFF_FFFF;

const FLAGS_SHIFT: u32 = 56;

/// Fixed snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexHeader {
    pub version: i16,
    pub key_size: u32,
    pub value_size: u32,
    pub file_end_pointer: i64,
}

impl IndexHeader {
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let start = cursor.position();
        let version = cursor.read_i16()?;
        if version != INDEX_VERSION_V0 {
            return Err(cursor.decode_error(start, format!("index version {version} not supported")));
        }
        let key_size = cursor.read_i32()?;
        let value_size = cursor.read_i32()?;
        let file_end_pointer = cursor.read_i64()?;
        let key_size = u32::try_from(key_size)
            .map_err(|_| cursor.decode_error(start, format!("negative key size {key_size}")))?;
        let value_size = u32::try_from(value_size)
            .ok()
            .filter(|size| *size as usize >= INDEX_VALUE_MIN_SIZE)
            .ok_or_else(|| {
                cursor.decode_error(
                    start,
                    format!("value size {value_size} below minimum {INDEX_VALUE_MIN_SIZE}"),
                )
            })?;
        Ok(Self {
            version,
            key_size,
            value_size,
            file_end_pointer,
        })
    }
}

/// Decode one value region of `value_size` bytes.
pub fn decode_index_value(cursor: &mut ByteCursor<'_>, value_size: usize) -> Result<IndexValue> {
    let start = cursor.position();
    if value_size < INDEX_VALUE_MIN_SIZE {
        return Err(cursor.decode_error(start, format!("value size {value_size} too small")));
    }
    let log_offset = cursor.read_i64()?;
    let size = cursor.read_i64()?;
    let flags_and_expiry = cursor.read_u64()?;
    let original_message_offset = if value_size >= INDEX_VALUE_WITH_ORIGINAL_OFFSET_SIZE {
        cursor.read_i64()?
    } else {
        -1
    };
    cursor.skip(value_size - cursor.consumed_since(start).len())?;

    let expiry = flags_and_expiry & NEVER_EXPIRES;
    Ok(IndexValue {
        log_offset,
        size,
        original_message_offset,
        flags: IndexFlags::from_bits_retain((flags_and_expiry >> FLAGS_SHIFT) as u8),
        expires_at_ms: (expiry != NEVER_EXPIRES).then_some(expiry),
    })
}

/// Summary returned once every entry has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTrailer {
    pub crc: FileTrailer,
    pub entries: u64,
    pub key_size_mismatches: u64,
}

/// Streaming reader: header on construction, entries by iteration, trailer by
/// [`IndexSnapshotReader::finish`].
///
/// Iteration stops after the first error; entries yielded before it stay valid.
#[derive(Debug)]
pub struct IndexSnapshotReader<'k> {
    bytes: Vec<u8>,
    pos: usize,
    header: IndexHeader,
    keys: &'k dyn KeyCodec,
    entries: u64,
    key_size_mismatches: u64,
    pending: Vec<Anomaly>,
    failed: bool,
}

impl<'k> IndexSnapshotReader<'k> {
    pub fn new(bytes: Vec<u8>, keys: &'k dyn KeyCodec) -> Result<Self> {
        let mut cursor = ByteCursor::new(&bytes, 0);
        let header = IndexHeader::decode(&mut cursor)?;
        let pos = cursor.position();
        debug!(
            target: TARGET,
            key_size = header.key_size,
            value_size = header.value_size,
            file_end_pointer = header.file_end_pointer,
            file_len = bytes.len(),
            "read index header"
        );
        Ok(Self {
            bytes,
            pos,
            header,
            keys,
            entries: 0,
            key_size_mismatches: 0,
            pending: Vec::new(),
            failed: false,
        })
    }

    pub fn open(path: &Path, keys: &'k dyn KeyCodec) -> Result<Self> {
        info!(target: TARGET, path = %path.display(), "opening index snapshot");
        Self::new(fs::read(path)?, keys)
    }

    #[must_use]
    pub const fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Entries decoded so far.
    #[must_use]
    pub const fn entries_read(&self) -> u64 {
        self.entries
    }

    /// Anomalies observed since the last call.
    pub fn drain_anomalies(&mut self) -> Vec<Anomaly> {
        std::mem::take(&mut self.pending)
    }

    fn decode_entry(&mut self) -> Result<IndexEntry> {
        let mut cursor = ByteCursor::new(&self.bytes[self.pos..], self.pos as u64);
        let file_offset = cursor.absolute_offset();
        let key = self.keys.decode_key(&mut cursor)?;
        let value = decode_index_value(&mut cursor, self.header.value_size as usize)?;
        self.pos += cursor.position();

        if key.encoded_len() != self.header.key_size as usize {
            warn!(
                target: TARGET,
                key = %key,
                declared = self.header.key_size,
                actual = key.encoded_len(),
                file_offset,
                "key size mismatch"
            );
            self.key_size_mismatches += 1;
            self.pending.push(Anomaly::KeySizeMismatch {
                key: key.id(),
                declared: self.header.key_size,
                actual: key.encoded_len(),
                file_offset,
            });
        }
        Ok(IndexEntry {
            key,
            value,
            file_offset,
        })
    }

    /// Read the trailer at the current position.
    pub fn finish(self) -> Result<IndexTrailer> {
        let mut cursor = ByteCursor::new(&self.bytes[self.pos..], self.pos as u64);
        let crc = FileTrailer::read(&mut cursor, &self.bytes[..self.pos])?;
        if !crc.matches() {
            warn!(
                target: TARGET,
                stored = crc.stored,
                computed = crc.computed,
                "index crc mismatch"
            );
        }
        info!(
            target: TARGET,
            entries = self.entries,
            key_size_mismatches = self.key_size_mismatches,
            "read index snapshot"
        );
        Ok(IndexTrailer {
            crc,
            entries: self.entries,
            key_size_mismatches: self.key_size_mismatches,
        })
    }
}

impl Iterator for IndexSnapshotReader<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bytes.len() - self.pos <= CRC_SIZE {
            return None;
        }
        match self.decode_entry() {
            Ok(entry) => {
                self.entries += 1;
                Some(Ok(entry))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// A fully decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSnapshot {
    pub header: IndexHeader,
    pub entries: Vec<IndexEntry>,
    pub anomalies: Vec<Anomaly>,
    pub trailer: IndexTrailer,
}

pub fn decode_index_snapshot(bytes: Vec<u8>, keys: &dyn KeyCodec) -> Result<IndexSnapshot> {
    collect(IndexSnapshotReader::new(bytes, keys)?)
}

pub fn read_index_snapshot(path: &Path, keys: &dyn KeyCodec) -> Result<IndexSnapshot> {
    collect(IndexSnapshotReader::open(path, keys)?)
}

fn collect(mut reader: IndexSnapshotReader<'_>) -> Result<IndexSnapshot> {
    let header = *reader.header();
    let mut entries = Vec::new();
    for entry in reader.by_ref() {
        entries.push(entry?);
    }
    let anomalies = reader.drain_anomalies();
    let trailer = reader.finish()?;
    Ok(IndexSnapshot {
        header,
        entries,
        anomalies,
        trailer,
    })
}

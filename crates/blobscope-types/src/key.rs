//! Store keys, partitions and the codecs that decode them.
//!
//! The decoders never interpret a key beyond what the codec needs to find its
//! end: a [`StoreKey`] is the exact encoded byte sequence, compared bytewise
//! and rendered as lowercase hex.

use std::fmt;

use blobscope_error::Result;
use serde::{Serialize, Serializer};

use crate::cursor::ByteCursor;

/// Current `BlobId` wire version.
pub const BLOB_ID_VERSION: i16 = 1;
/// Current partition-id wire version.
pub const PARTITION_ID_VERSION: i16 = 1;

/// Opaque, self-delimiting key as found on disk.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    encoded: Vec<u8>,
}

impl StoreKey {
    /// Wrap the exact bytes a codec consumed.
    #[must_use]
    pub fn from_encoded(encoded: Vec<u8>) -> Self {
        Self { encoded }
    }

    /// Number of bytes the key occupies on disk.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Stable string rendering used by reports and key filters.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.encoded {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({self})")
    }
}

impl Serialize for StoreKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decodes one key from a cursor positioned at its first byte.
///
/// The bytes consumed are exactly `key.encoded_len()`.
pub trait KeyCodec: fmt::Debug {
    fn decode_key(&self, cursor: &mut ByteCursor<'_>) -> Result<StoreKey>;
}

/// Identifier of the partition a replica or blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitionId(pub i64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition[{}]", self.0)
    }
}

/// Maps an on-disk partition reference to a [`PartitionId`].
pub trait PartitionResolver: fmt::Debug {
    fn resolve_partition_id(&self, cursor: &mut ByteCursor<'_>) -> Result<PartitionId>;
}

/// `version:int16 (=1) | id:int64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitionResolver;

impl DefaultPartitionResolver {
    /// Serialized form of `id`.
    #[must_use]
    pub fn encode(id: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.extend_from_slice(&PARTITION_ID_VERSION.to_be_bytes());
        out.extend_from_slice(&id.to_be_bytes());
        out
    }
}

impl PartitionResolver for DefaultPartitionResolver {
    fn resolve_partition_id(&self, cursor: &mut ByteCursor<'_>) -> Result<PartitionId> {
        let start = cursor.position();
        let version = cursor.read_i16()?;
        if version != PARTITION_ID_VERSION {
            return Err(cursor.decode_error(
                start,
                format!("unsupported partition id version {version}"),
            ));
        }
        Ok(PartitionId(cursor.read_i64()?))
    }
}

/// Blob id: `version:int16 (=1) | partition | uuidLen:int32 | uuid`.
#[derive(Debug, Clone)]
pub struct BlobIdCodec<R = DefaultPartitionResolver> {
    resolver: R,
}

impl<R: PartitionResolver> BlobIdCodec<R> {
    pub const fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

impl BlobIdCodec {
    /// Codec using [`DefaultPartitionResolver`].
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            resolver: DefaultPartitionResolver,
        }
    }

    /// Serialized blob id for `partition` and `uuid`.
    #[must_use]
    pub fn encode(partition: i64, uuid: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + uuid.len());
        out.extend_from_slice(&BLOB_ID_VERSION.to_be_bytes());
        out.extend_from_slice(&DefaultPartitionResolver::encode(partition));
        out.extend_from_slice(&(uuid.len() as i32).to_be_bytes());
        out.extend_from_slice(uuid.as_bytes());
        out
    }
}

impl<R: PartitionResolver> KeyCodec for BlobIdCodec<R> {
    fn decode_key(&self, cursor: &mut ByteCursor<'_>) -> Result<StoreKey> {
        let start = cursor.position();
        let version = cursor.read_i16()?;
        if version != BLOB_ID_VERSION {
            return Err(cursor.decode_error(start, format!("unsupported blob id version {version}")));
        }
        self.resolver.resolve_partition_id(cursor)?;
        cursor.read_int_string()?;
        Ok(StoreKey::from_encoded(cursor.consumed_since(start).to_vec()))
    }
}

/// Keys of exactly `width` raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthKeyCodec {
    width: usize,
}

impl FixedWidthKeyCodec {
    #[must_use]
    pub const fn new(width: usize) -> Self {
        Self { width }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }
}

impl KeyCodec for FixedWidthKeyCodec {
    fn decode_key(&self, cursor: &mut ByteCursor<'_>) -> Result<StoreKey> {
        Ok(StoreKey::from_encoded(cursor.read_bytes(self.width)?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_id_round_trip_consumes_exact_length() {
        let mut bytes = BlobIdCodec::encode(42, "0f6b2a4e-uuid");
        let key_len = bytes.len();
        bytes.extend_from_slice(b"trailing");

        let mut cursor = ByteCursor::new(&bytes, 0);
        let key = BlobIdCodec::standard()
            .decode_key(&mut cursor)
            .expect("blob id should decode");
        assert_eq!(key.encoded_len(), key_len);
        assert_eq!(cursor.position(), key_len);
        assert_eq!(key.as_bytes(), &bytes[..key_len]);
    }

    #[test]
    fn blob_id_rejects_unknown_version() {
        let mut bytes = BlobIdCodec::encode(1, "abc");
        bytes[1] = 9;
        let mut cursor = ByteCursor::new(&bytes, 64);
        let err = BlobIdCodec::standard()
            .decode_key(&mut cursor)
            .expect_err("version 9 is unknown");
        assert!(err.is_recoverable());
        assert_eq!(err.offset(), Some(64));
    }

    #[test]
    fn blob_id_rejects_unknown_partition_version() {
        let mut bytes = BlobIdCodec::encode(1, "abc");
        bytes[3] = 7;
        let mut cursor = ByteCursor::new(&bytes, 0);
        let err = BlobIdCodec::standard()
            .decode_key(&mut cursor)
            .expect_err("partition version 7 is unknown");
        assert_eq!(err.offset(), Some(2));
    }

    #[test]
    fn rendering_is_lowercase_hex_and_stable() {
        let key = StoreKey::from_encoded(vec![0x00, 0xAB, 0x10]);
        assert_eq!(key.id(), "00ab10");
        assert_eq!(format!("{key:?}"), "StoreKey(00ab10)");
    }

    #[test]
    fn fixed_width_codec_reads_width_bytes() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut cursor = ByteCursor::new(&bytes, 0);
        let key = FixedWidthKeyCodec::new(8)
            .decode_key(&mut cursor)
            .expect("8 bytes available");
        assert_eq!(key.encoded_len(), 8);
        assert_eq!(cursor.remaining(), 1);
        assert!(
            FixedWidthKeyCodec::new(8)
                .decode_key(&mut cursor)
                .expect_err("1 byte left")
                .is_end_of_input()
        );
    }
}

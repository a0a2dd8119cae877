//! Record codec: decodes one log record from a byte cursor.
//!
//! A record is laid out as
//! `header | key | body`, where the body is either the three put sub-records
//! (blob properties, user metadata, blob data) or a single delete marker.
//! Relative offsets in the header are measured from the first body byte.
//!
//! Failures come in two kinds, kept apart all the way up:
//! - [`AuditError::Decode`] for unknown versions, checksum mismatches and
//!   layout violations. The scanner skips one byte and retries.
//! - [`AuditError::EndOfInput`] when a recognized structure runs past the
//!   end of the input. Never retried.

use std::fmt;

use blobscope_error::{AuditError, Result};
use blobscope_types::{
    BlobProperties, ByteCursor, KeyCodec, LogRecord, MessageHeader, RecordBody, SENTINEL_INVALID,
};

use crate::checksum::{expect_trailer, trailer_crc};

/// Bytes of the version discriminator that opens every structure.
pub const VERSION_SIZE: usize = 2;
/// Header version understood by [`MessageFormatV1`].
pub const MESSAGE_HEADER_VERSION_V1: i16 = 1;
/// Encoded size of a v1 message header.
pub const MESSAGE_HEADER_V1_SIZE: usize = 2 + 8 * 5;
/// Version of every v1 sub-record.
pub const SUB_RECORD_VERSION_V1: i16 = 1;

/// Decoders for the header and sub-records of one message format.
///
/// Each method consumes exactly one structure and fails with a
/// distinguishable decode or end-of-input error.
pub trait MessageCodec: fmt::Debug {
    fn decode_header(&self, cursor: &mut ByteCursor<'_>) -> Result<MessageHeader>;
    fn decode_blob_properties(&self, cursor: &mut ByteCursor<'_>) -> Result<BlobProperties>;
    /// Returns the metadata payload size.
    fn decode_user_metadata(&self, cursor: &mut ByteCursor<'_>) -> Result<u64>;
    /// Returns the blob payload size.
    fn decode_blob(&self, cursor: &mut ByteCursor<'_>) -> Result<u64>;
    fn decode_delete_record(&self, cursor: &mut ByteCursor<'_>) -> Result<bool>;
}

/// Version-1 message format with CRC-32C protected header and sub-records.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFormatV1;

fn expect_version(cursor: &mut ByteCursor<'_>, expected: i16, what: &str) -> Result<usize> {
    let start = cursor.position();
    let version = cursor.read_i16()?;
    if version != expected {
        return Err(cursor.decode_error(start, format!("{what} version {version} not supported")));
    }
    Ok(start)
}

fn length_from_i64(cursor: &ByteCursor<'_>, start: usize, len: i64, what: &str) -> Result<usize> {
    usize::try_from(len).map_err(|_| cursor.decode_error(start, format!("negative {what} size {len}")))
}

impl MessageCodec for MessageFormatV1 {
    fn decode_header(&self, cursor: &mut ByteCursor<'_>) -> Result<MessageHeader> {
        let start = expect_version(cursor, MESSAGE_HEADER_VERSION_V1, "header")?;
        let message_size = cursor.read_i64()?;
        let blob_props_rel_offset = cursor.read_i64()?;
        let user_metadata_rel_offset = cursor.read_i64()?;
        let blob_data_rel_offset = cursor.read_i64()?;
        let computed = trailer_crc(cursor.consumed_since(start));
        let crc = cursor.read_i64()?;
        if crc as u64 != computed {
            return Err(cursor.decode_error(
                start,
                format!("message header crc mismatch: stored {crc:#010x}, computed {computed:#010x}"),
            ));
        }

        let header = MessageHeader {
            version: MESSAGE_HEADER_VERSION_V1,
            header_size: MESSAGE_HEADER_V1_SIZE as u64,
            message_size,
            blob_props_rel_offset,
            user_metadata_rel_offset,
            blob_data_rel_offset,
            crc,
        };
        validate_header(&header).map_err(|detail| cursor.decode_error(start, detail))?;
        Ok(header)
    }

    fn decode_blob_properties(&self, cursor: &mut ByteCursor<'_>) -> Result<BlobProperties> {
        let start = expect_version(cursor, SUB_RECORD_VERSION_V1, "blob properties")?;
        let blob_size = cursor.read_i64()?;
        let ttl_seconds = cursor.read_i64()?;
        let is_private = cursor.read_bool()?;
        let creation_time_ms = cursor.read_i64()?;
        let service_id = cursor.read_int_string()?;
        let owner_id = cursor.read_int_string()?;
        let content_type = cursor.read_int_string()?;
        expect_trailer(cursor, start, "blob properties")?;
        if blob_size < 0 {
            return Err(cursor.decode_error(start, format!("negative blob size {blob_size}")));
        }
        Ok(BlobProperties {
            blob_size,
            ttl_seconds,
            is_private,
            creation_time_ms,
            service_id,
            owner_id,
            content_type,
        })
    }

    fn decode_user_metadata(&self, cursor: &mut ByteCursor<'_>) -> Result<u64> {
        let start = expect_version(cursor, SUB_RECORD_VERSION_V1, "user metadata")?;
        let size = cursor.read_i32()?;
        let len = length_from_i64(cursor, start, i64::from(size), "user metadata")?;
        cursor.skip(len)?;
        expect_trailer(cursor, start, "user metadata")?;
        Ok(len as u64)
    }

    fn decode_blob(&self, cursor: &mut ByteCursor<'_>) -> Result<u64> {
        let start = expect_version(cursor, SUB_RECORD_VERSION_V1, "blob")?;
        let size = cursor.read_i64()?;
        let len = length_from_i64(cursor, start, size, "blob")?;
        cursor.skip(len)?;
        expect_trailer(cursor, start, "blob")?;
        Ok(len as u64)
    }

    fn decode_delete_record(&self, cursor: &mut ByteCursor<'_>) -> Result<bool> {
        let start = expect_version(cursor, SUB_RECORD_VERSION_V1, "delete record")?;
        let flag = cursor.read_bool()?;
        expect_trailer(cursor, start, "delete record")?;
        Ok(flag)
    }
}

fn validate_header(header: &MessageHeader) -> std::result::Result<(), String> {
    if header.message_size < 0 {
        return Err(format!("negative message size {}", header.message_size));
    }
    let (props, metadata, data) = (
        header.blob_props_rel_offset,
        header.user_metadata_rel_offset,
        header.blob_data_rel_offset,
    );
    if header.is_put() {
        if props < 0 || metadata <= props || data <= metadata || data >= header.message_size {
            return Err(format!(
                "put offsets out of order: properties {props}, metadata {metadata}, data {data}, message size {}",
                header.message_size
            ));
        }
    } else if metadata != SENTINEL_INVALID || data != SENTINEL_INVALID {
        return Err(format!(
            "delete header carries sub-record offsets: metadata {metadata}, data {data}"
        ));
    }
    Ok(())
}

/// Check that a sub-record starts where the header says, relative to the body.
fn expect_at(cursor: &ByteCursor<'_>, rel_offset: i64, what: &str) -> Result<()> {
    let actual = cursor.position() as i64;
    if actual != rel_offset {
        return Err(cursor.decode_error(
            cursor.position(),
            format!("{what} found at relative offset {actual}, header declares {rel_offset}"),
        ));
    }
    Ok(())
}

fn decode_body(
    cursor: &mut ByteCursor<'_>,
    header: &MessageHeader,
    messages: &dyn MessageCodec,
) -> Result<RecordBody> {
    if !header.is_put() {
        return Ok(RecordBody::Delete {
            delete_flag: messages.decode_delete_record(cursor)?,
        });
    }
    expect_at(cursor, header.blob_props_rel_offset, "blob properties")?;
    let properties = messages.decode_blob_properties(cursor)?;
    expect_at(cursor, header.user_metadata_rel_offset, "user metadata")?;
    let metadata_size = messages.decode_user_metadata(cursor)?;
    expect_at(cursor, header.blob_data_rel_offset, "blob")?;
    let data_size = messages.decode_blob(cursor)?;
    Ok(RecordBody::Put {
        properties,
        metadata_size,
        data_size,
    })
}

/// Decode one log record starting at the cursor position.
///
/// On success the cursor sits on the first byte after the record, which is
/// exactly `record.total_size()` bytes further.
pub fn decode_log_record(
    cursor: &mut ByteCursor<'_>,
    keys: &dyn KeyCodec,
    messages: &dyn MessageCodec,
) -> Result<LogRecord> {
    let offset = cursor.absolute_offset();
    let start = cursor.position();
    match cursor.remaining() {
        0 => {
            return Err(AuditError::EndOfInput {
                offset,
                needed: VERSION_SIZE as u64,
                available: 0,
            });
        }
        n if n < VERSION_SIZE => {
            return Err(cursor.decode_error(start, format!("unrecognized tail fragment of {n} bytes")));
        }
        _ => {}
    }

    let header = messages.decode_header(cursor)?;
    let key = keys.decode_key(cursor)?;

    // The body is confined to `message_size` bytes: running out inside it is a
    // layout violation, running out before it is the file ending.
    let body_len = usize::try_from(header.message_size)
        .map_err(|_| cursor.decode_error(start, format!("message size {} too large", header.message_size)))?;
    let body_base = cursor.absolute_offset();
    let mut body_cursor = ByteCursor::new(cursor.read_bytes(body_len)?, body_base);
    let body = decode_body(&mut body_cursor, &header, messages).map_err(|err| match err {
        AuditError::EndOfInput { offset, needed, .. } => AuditError::decode(
            offset,
            format!(
                "sub-record needs {needed} bytes past the end of a {body_len}-byte message body at {body_base}"
            ),
        ),
        other => other,
    })?;

    if body_cursor.remaining() != 0 {
        return Err(AuditError::decode(
            offset,
            format!(
                "message size {} does not match decoded body of {} bytes",
                header.message_size,
                body_cursor.position()
            ),
        ));
    }

    Ok(LogRecord {
        offset,
        header,
        key,
        body,
    })
}

#[cfg(test)]
mod tests {
    use blobscope_types::{BlobIdCodec, FixedWidthKeyCodec};

    use super::*;
    use crate::encode;

    fn decode(bytes: &[u8], base: u64) -> Result<LogRecord> {
        let mut cursor = ByteCursor::new(bytes, base);
        decode_log_record(&mut cursor, &FixedWidthKeyCodec::new(4), &MessageFormatV1)
    }

    #[test]
    fn put_record_decodes_with_exact_total_size() {
        let bytes = encode::put_record(b"k001", &encode::sample_properties(5), b"meta", b"hello");
        let record = decode(&bytes, 1000).expect("put decodes");
        assert_eq!(record.offset, 1000);
        assert_eq!(record.total_size(), bytes.len() as u64);
        assert_eq!(record.blob_size(), Some(5));
        assert_eq!(record.metadata_size(), Some(4));
        assert_eq!(record.service_id(), Some("svc"));
        assert_eq!(record.header.blob_props_rel_offset, 0);
    }

    #[test]
    fn delete_record_has_sentinel_offsets() {
        let bytes = encode::delete_record(b"k002", true);
        let record = decode(&bytes, 0).expect("delete decodes");
        assert!(record.is_delete());
        assert_eq!(record.header.user_metadata_rel_offset, SENTINEL_INVALID);
        assert_eq!(record.delete_flag(), Some(true));
        assert_eq!(record.next_offset(), bytes.len() as u64);
    }

    #[test]
    fn blob_id_keys_are_variable_length() {
        let key = BlobIdCodec::encode(9, "a-longer-uuid-value");
        let bytes = encode::delete_record(&key, false);
        let mut cursor = ByteCursor::new(&bytes, 0);
        let record = decode_log_record(&mut cursor, &BlobIdCodec::standard(), &MessageFormatV1)
            .expect("delete with blob id");
        assert_eq!(record.encoded_key_size(), key.len() as u64);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn header_crc_mismatch_is_recoverable() {
        let mut bytes = encode::delete_record(b"k003", true);
        bytes[5] ^= 0x10;
        let err = decode(&bytes, 7).expect_err("corrupt header");
        assert!(err.is_recoverable());
        assert_eq!(err.offset(), Some(7));
    }

    #[test]
    fn unknown_version_is_recoverable() {
        let mut bytes = encode::delete_record(b"k004", true);
        bytes[1] = 2;
        assert!(decode(&bytes, 0).expect_err("version 2").is_recoverable());
    }

    #[test]
    fn sub_record_crc_mismatch_is_recoverable() {
        let mut bytes = encode::put_record(b"k005", &encode::sample_properties(3), b"", b"abc");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(decode(&bytes, 0).expect_err("blob crc").is_recoverable());
    }

    #[test]
    fn message_size_disagreeing_with_body_is_rejected() {
        let marker = encode::delete_marker(true);
        let mut bytes = encode::message_header(
            marker.len() as i64 + 4,
            SENTINEL_INVALID,
            SENTINEL_INVALID,
            SENTINEL_INVALID,
        );
        bytes.extend_from_slice(b"k006");
        bytes.extend(marker);
        bytes.extend_from_slice(&[0; 4]);
        assert!(decode(&bytes, 0).expect_err("size mismatch").is_recoverable());
    }

    #[test]
    fn put_offsets_out_of_order_are_rejected() {
        let mut bytes = encode::message_header(100, 0, 50, 40);
        bytes.extend_from_slice(&[0; 120]);
        assert!(decode(&bytes, 0).expect_err("bad offsets").is_recoverable());
    }

    #[test]
    fn sub_record_length_past_the_message_body_is_recoverable() {
        let properties = encode::sample_properties(4);
        let record = encode::put_record(b"k008", &properties, b"meta", b"data");
        let mut trailing = record.clone();
        for _ in 0..50 {
            trailing.extend(encode::delete_record(b"k009", true));
        }

        let blob_size_at = record.len() - (2 + 8 + 4 + 8) + 2;
        let mut bytes = trailing.clone();
        bytes[blob_size_at..blob_size_at + 8].copy_from_slice(&(1i64 << 40).to_be_bytes());
        let err = decode(&bytes, 0).expect_err("blob size overruns body");
        assert!(err.is_recoverable(), "{err}");

        let metadata_size_at = MESSAGE_HEADER_V1_SIZE + 4 + encode::blob_properties(&properties).len() + 2;
        let mut bytes = trailing;
        bytes[metadata_size_at..metadata_size_at + 4].copy_from_slice(&i32::MAX.to_be_bytes());
        let err = decode(&bytes, 0).expect_err("metadata size overruns body");
        assert!(err.is_recoverable(), "{err}");
    }

    #[test]
    fn tail_fragments() {
        let empty = decode(&[], 90).expect_err("nothing left");
        assert!(empty.is_end_of_input());
        assert_eq!(empty.offset(), Some(90));

        let one = decode(&[0x00], 99).expect_err("one byte left");
        assert!(one.is_recoverable());
        assert_eq!(one.offset(), Some(99));
    }

    #[test]
    fn truncation_after_a_recognized_version_is_end_of_input() {
        let bytes = encode::put_record(b"k007", &encode::sample_properties(3), b"", b"abc");
        for cut in [3, 41, 50, bytes.len() - 1] {
            let err = decode(&bytes[..cut], 0).expect_err("truncated");
            assert!(err.is_end_of_input(), "cut at {cut}: {err}");
        }
    }
}

//! Decoders for the on-disk artifacts of an append-only blob store.
//!
//! - [`codec`]: one log record (header, key, put sub-records or delete marker).
//! - [`scan`]: sequential log scanning with one-byte resynchronization.
//! - [`index`]: index snapshot files, streamed entry by entry.
//! - [`replica_token`]: replication cursor files.
//! - `encode`: writers for all of the above, used to build fixtures. Only
//!   compiled for tests or with the `fixtures` feature.
//!
//! All integers are big-endian. Decoders only read.

pub mod checksum;
pub mod codec;
#[cfg(any(test, feature = "fixtures"))]
pub mod encode;
pub mod index;
pub mod replica_token;
pub mod scan;

pub use checksum::{CRC_SIZE, FileTrailer, trailer_crc};
pub use codec::{MESSAGE_HEADER_V1_SIZE, MessageCodec, MessageFormatV1, decode_log_record};
pub use index::{
    INDEX_HEADER_SIZE, IndexHeader, IndexSnapshot, IndexSnapshotReader, IndexTrailer,
    NEVER_EXPIRES, decode_index_snapshot, decode_index_value, read_index_snapshot,
};
pub use replica_token::{
    ReplicaTokenReader, ReplicaTokenTrailer, StoreFindTokenCodec, TokenCodec, TokenKind,
    decode_replica_token_file,
};
pub use scan::{LogScanner, LogSource, ScanOptions, ScanStep, ScanSummary, read_record_at};

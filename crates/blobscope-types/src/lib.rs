//! Value types and collaborator traits shared by the blobscope decoders.
//!
//! Nothing here touches the filesystem. The decoders in `blobscope-format`
//! produce these values and the audit layer consumes them.

pub mod cursor;
pub mod index;
pub mod key;
pub mod record;
pub mod status;
pub mod token;

pub use cursor::ByteCursor;
pub use index::{IndexEntry, IndexFlags, IndexValue};
pub use key::{
    BLOB_ID_VERSION, BlobIdCodec, DefaultPartitionResolver, FixedWidthKeyCodec, KeyCodec,
    PARTITION_ID_VERSION, PartitionId, PartitionResolver, StoreKey,
};
pub use record::{BlobProperties, LogRecord, MessageHeader, RecordBody, SENTINEL_INVALID};
pub use status::{Anomaly, BlobStatus};
pub use token::{OpaqueToken, ReplicaTokenRecord};

//! Replication cursor records.

use std::fmt;

use serde::Serialize;

use crate::key::PartitionId;

/// Token payload, decoded and rendered by a token codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpaqueToken {
    /// Token kind the codec recognized (e.g. `store_find_token_v0`).
    pub kind: String,
    pub description: String,
    pub encoded_len: usize,
}

impl fmt::Display for OpaqueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Progress of one remote peer as tracked by a local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaTokenRecord {
    pub partition_id: PartitionId,
    pub remote_hostname: String,
    pub remote_replica_path: String,
    pub remote_port: i32,
    pub total_bytes_read_from_local_store: i64,
    pub token: OpaqueToken,
}

impl fmt::Display for ReplicaTokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partitionId {} hostname {} replicaPath {} port {} totalBytesReadFromLocalStore {} token {}",
            self.partition_id,
            self.remote_hostname,
            self.remote_replica_path,
            self.remote_port,
            self.total_bytes_read_from_local_store,
            self.token
        )
    }
}

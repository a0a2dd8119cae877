//! Run configuration shared by the CLI and library callers.
//!
//! Built from command-line flags, optionally layered over a JSON file. All
//! checks that need no file access happen in [`AuditConfig::validate`].

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use blobscope_error::{AuditError, Result};
use blobscope_types::{BlobIdCodec, FixedWidthKeyCodec, KeyCodec};
use serde::{Deserialize, Serialize};

/// The eight inspection operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    DumpIndex,
    DumpIndexesForReplica,
    DumpActiveBlobsFromIndex,
    DumpActiveBlobsForReplica,
    DumpNRandomActiveBlobsForReplica,
    DumpLog,
    DumpReplicatoken,
    CompareIndexToLog,
}

impl Operation {
    pub const ALL: [Self; 8] = [
        Self::DumpIndex,
        Self::DumpIndexesForReplica,
        Self::DumpActiveBlobsFromIndex,
        Self::DumpActiveBlobsForReplica,
        Self::DumpNRandomActiveBlobsForReplica,
        Self::DumpLog,
        Self::DumpReplicatoken,
        Self::CompareIndexToLog,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DumpIndex => "DumpIndex",
            Self::DumpIndexesForReplica => "DumpIndexesForReplica",
            Self::DumpActiveBlobsFromIndex => "DumpActiveBlobsFromIndex",
            Self::DumpActiveBlobsForReplica => "DumpActiveBlobsForReplica",
            Self::DumpNRandomActiveBlobsForReplica => "DumpNRandomActiveBlobsForReplica",
            Self::DumpLog => "DumpLog",
            Self::DumpReplicatoken => "DumpReplicatoken",
            Self::CompareIndexToLog => "CompareIndexToLog",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == raw)
    }

    /// Whether the operation walks a replica directory instead of one file.
    #[must_use]
    pub const fn reads_replica_dir(self) -> bool {
        matches!(
            self,
            Self::DumpIndexesForReplica
                | Self::DumpActiveBlobsForReplica
                | Self::DumpNRandomActiveBlobsForReplica
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order in which a replica's snapshot files are folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrder {
    /// Ascending numeric file-name prefix (`<logOffset>_index`).
    #[default]
    LogOffset,
    /// Raw directory listing order.
    Listing,
}

impl SnapshotOrder {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "log_offset" | "log-offset" => Some(Self::LogOffset),
            "listing" => Some(Self::Listing),
            _ => None,
        }
    }
}

/// How random active blobs are drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStrategy {
    /// Independent draws; the same key may repeat.
    #[default]
    WithReplacement,
    /// Distinct keys.
    WithoutReplacement,
}

impl SampleStrategy {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "with_replacement" | "with-replacement" => Some(Self::WithReplacement),
            "without_replacement" | "without-replacement" => Some(Self::WithoutReplacement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub operation: Option<Operation>,
    /// Index, log or replica-token file, depending on the operation.
    pub file: Option<PathBuf>,
    /// Log file for `CompareIndexToLog`.
    pub log_file: Option<PathBuf>,
    pub replica_dir: Option<PathBuf>,
    pub start_offset: Option<u64>,
    pub end_offset: Option<u64>,
    /// Rendered keys to restrict output to.
    pub blobs: Vec<String>,
    pub out_file: Option<PathBuf>,
    pub exclude_misc_logging: bool,
    pub active_blobs_count: Option<usize>,
    pub sample_strategy: SampleStrategy,
    pub seed: Option<u64>,
    pub snapshot_order: SnapshotOrder,
    /// Decode keys as fixed-width raw bytes instead of blob ids.
    pub key_width: Option<usize>,
    /// Reference time for expiry checks; defaults to the system clock.
    pub now_ms: Option<u64>,
}

impl AuditConfig {
    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|err| AuditError::config(format!("invalid config {}: {err}", path.display())))
    }

    /// Check everything that can be checked without touching the inputs.
    pub fn validate(&self) -> Result<Operation> {
        let operation = self
            .operation
            .ok_or_else(|| AuditError::config("--operation is required"))?;

        if operation.reads_replica_dir() {
            if self.replica_dir.is_none() {
                return Err(AuditError::config(format!(
                    "{operation} requires --replica-dir"
                )));
            }
        } else if self.file.is_none() {
            return Err(AuditError::config(format!("{operation} requires --file")));
        }

        match operation {
            Operation::DumpNRandomActiveBlobsForReplica if self.active_blobs_count.is_none() => {
                return Err(AuditError::config(
                    "--active-blobs-count must be set for DumpNRandomActiveBlobsForReplica",
                ));
            }
            Operation::CompareIndexToLog if self.log_file.is_none() => {
                return Err(AuditError::config(
                    "--log-file must be set for CompareIndexToLog",
                ));
            }
            _ => {}
        }

        if let (Some(start), Some(end)) = (self.start_offset, self.end_offset) {
            if start > end {
                return Err(AuditError::config(format!(
                    "start offset {start} is past end offset {end}"
                )));
            }
        }
        if self.key_width == Some(0) {
            return Err(AuditError::config("--key-width must be positive"));
        }
        Ok(operation)
    }

    /// Keys to restrict output to, or `None` for all keys.
    #[must_use]
    pub fn key_filter(&self) -> Option<BTreeSet<String>> {
        let keys: BTreeSet<String> = self
            .blobs
            .iter()
            .map(|key| key.trim().to_ascii_lowercase())
            .filter(|key| !key.is_empty())
            .collect();
        (!keys.is_empty()).then_some(keys)
    }

    #[must_use]
    pub fn key_codec(&self) -> Box<dyn KeyCodec> {
        match self.key_width {
            Some(width) => Box::new(FixedWidthKeyCodec::new(width)),
            None => Box::new(BlobIdCodec::standard()),
        }
    }

    /// Milliseconds since the epoch that expiry is judged against.
    #[must_use]
    pub fn reference_time_ms(&self) -> u64 {
        self.now_ms.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_millis() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(operation: Operation) -> AuditConfig {
        AuditConfig {
            operation: Some(operation),
            ..AuditConfig::default()
        }
    }

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.name()), Some(op));
        }
        assert_eq!(Operation::parse("dumpindex"), None);
    }

    #[test]
    fn missing_sample_count_is_a_config_error() {
        let mut cfg = config(Operation::DumpNRandomActiveBlobsForReplica);
        cfg.replica_dir = Some(PathBuf::from("/nonexistent/replica"));
        let err = cfg.validate().expect_err("count missing");
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("--active-blobs-count"));

        cfg.active_blobs_count = Some(5);
        assert_eq!(cfg.validate().expect("valid"), Operation::DumpNRandomActiveBlobsForReplica);
    }

    #[test]
    fn compare_requires_log_file() {
        let mut cfg = config(Operation::CompareIndexToLog);
        cfg.file = Some(PathBuf::from("0_index"));
        assert!(cfg.validate().expect_err("no log").to_string().contains("--log-file"));
        cfg.log_file = Some(PathBuf::from("log_current"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut cfg = config(Operation::DumpLog);
        cfg.file = Some(PathBuf::from("log_current"));
        cfg.start_offset = Some(10);
        cfg.end_offset = Some(5);
        assert!(matches!(cfg.validate(), Err(AuditError::Config { .. })));
    }

    #[test]
    fn missing_operation_or_path() {
        assert!(AuditConfig::default().validate().is_err());
        assert!(config(Operation::DumpIndex).validate().is_err());
        assert!(config(Operation::DumpActiveBlobsForReplica).validate().is_err());
    }

    #[test]
    fn key_filter_normalizes_case_and_blanks() {
        let mut cfg = config(Operation::DumpIndex);
        assert_eq!(cfg.key_filter(), None);
        cfg.blobs = vec!["00AB".to_owned(), " ".to_owned()];
        assert_eq!(cfg.key_filter(), Some(BTreeSet::from(["00ab".to_owned()])));
    }

    #[test]
    fn json_uses_snake_case_strategies() {
        let cfg: AuditConfig = serde_json::from_str(
            r#"{"operation":"DumpLog","file":"log","sample_strategy":"without_replacement","snapshot_order":"listing"}"#,
        )
        .expect("parses");
        assert_eq!(cfg.sample_strategy, SampleStrategy::WithoutReplacement);
        assert_eq!(cfg.snapshot_order, SnapshotOrder::Listing);
        assert!(serde_json::from_str::<AuditConfig>(r#"{"bogus":1}"#).is_err());
    }
}

//! Operations over decoded store artifacts.
//!
//! Configuration selects one [`Operation`]; [`Auditor`] runs it against a
//! [`ReportSink`] and collects an [`OperationSummary`]. Cross-file state
//! lives in [`aggregate`], log/index consistency checks in
//! [`cross_validate`].

pub mod aggregate;
pub mod config;
pub mod cross_validate;
pub mod ops;
pub mod replica_dir;
pub mod report;
pub mod sample;

pub use aggregate::{ActiveBlobSet, BlobStatusMap};
pub use config::{AuditConfig, Operation, SampleStrategy, SnapshotOrder};
pub use cross_validate::{CrossValidationTally, CrossValidator, Verdict};
pub use ops::{Auditor, run};
pub use replica_dir::{list_snapshots, log_offset_prefix, replica_name};
pub use report::{OperationSummary, ReportSink};
pub use sample::sample;

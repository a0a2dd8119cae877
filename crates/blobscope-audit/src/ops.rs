//! The eight inspection operations.
//!
//! Every operation writes report lines to a [`ReportSink`] and fills an
//! [`OperationSummary`]. Replica operations report a snapshot that fails to
//! decode and carry on with the next file; single-file operations stop and
//! return the error once the lines produced so far are written.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use blobscope_error::{AuditError, Result};
use blobscope_format::{
    IndexSnapshotReader, LogScanner, LogSource, MessageFormatV1, ReplicaTokenReader, ScanOptions,
    ScanStep, StoreFindTokenCodec,
};
use blobscope_types::{Anomaly, DefaultPartitionResolver, IndexEntry, KeyCodec, StoreKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::aggregate::{ActiveBlobSet, BlobStatusMap};
use crate::config::{AuditConfig, Operation};
use crate::cross_validate::{CrossValidator, Verdict};
use crate::replica_dir::{list_snapshots, replica_name};
use crate::report::{OperationSummary, ReportSink};
use crate::sample::sample;

const TARGET: &str = "blobscope.audit::ops";

/// Replica name for single-file active-blob runs.
pub const UNKNOWN_REPLICA: &str = "unknown";

/// Validated configuration plus the collaborators it selects.
struct Context<'a> {
    config: &'a AuditConfig,
    keys: Box<dyn KeyCodec>,
    filter: Option<BTreeSet<String>>,
    now_ms: u64,
}

impl Context<'_> {
    fn wanted(&self, key: &StoreKey) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|keys| keys.contains(&key.id()))
    }
}

/// What to do with each decoded index entry.
enum EntryAction<'s> {
    Dump,
    DumpAndCollect(&'s mut Vec<IndexEntry>),
    TrackActive(&'s mut ActiveBlobSet),
}

/// Runs one configured operation.
pub struct Auditor<'a> {
    ctx: Context<'a>,
    operation: Operation,
    summary: OperationSummary,
}

impl<'a> Auditor<'a> {
    /// Validate `config`; fails before touching any file.
    pub fn new(config: &'a AuditConfig) -> Result<Self> {
        let operation = config.validate()?;
        Ok(Self {
            ctx: Context {
                config,
                keys: config.key_codec(),
                filter: config.key_filter(),
                now_ms: config.reference_time_ms(),
            },
            operation,
            summary: OperationSummary::new(operation),
        })
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Summary so far; complete after `run` returns, even on error.
    #[must_use]
    pub const fn summary(&self) -> &OperationSummary {
        &self.summary
    }

    #[must_use]
    pub fn into_summary(self) -> OperationSummary {
        self.summary
    }

    /// Run with an RNG seeded from `--seed`, or from entropy.
    pub fn run(&mut self, sink: &mut ReportSink) -> Result<()> {
        let mut rng = self
            .ctx
            .config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        self.run_with_rng(sink, &mut rng)
    }

    pub fn run_with_rng<R: Rng + ?Sized>(&mut self, sink: &mut ReportSink, rng: &mut R) -> Result<()> {
        info!(target: TARGET, operation = %self.operation, "starting operation");
        let before = sink.records_written();
        let ctx = &self.ctx;
        let summary = &mut self.summary;

        let result = blob_filter_banner(ctx, sink).and_then(|()| match self.operation {
            Operation::DumpIndex => dump_index(ctx, summary, sink),
            Operation::DumpIndexesForReplica => dump_indexes_for_replica(ctx, summary, sink),
            Operation::DumpActiveBlobsFromIndex => dump_active_blobs_from_index(ctx, summary, sink),
            Operation::DumpActiveBlobsForReplica => dump_active_blobs_for_replica(ctx, summary, sink),
            Operation::DumpNRandomActiveBlobsForReplica => {
                dump_n_random_active_blobs(ctx, summary, sink, rng)
            }
            Operation::DumpLog => dump_log(ctx, summary, sink),
            Operation::DumpReplicatoken => dump_replica_token(ctx, summary, sink),
            Operation::CompareIndexToLog => compare_index_to_log(ctx, summary, sink),
        });

        summary.records_emitted = sink.records_written() - before;
        match &result {
            Ok(()) => info!(
                target: TARGET,
                operation = %self.operation,
                records = summary.records_emitted,
                anomalies = summary.anomalies.len(),
                "operation complete"
            ),
            Err(err) => error!(target: TARGET, operation = %self.operation, error = %err, "operation failed"),
        }
        result
    }
}

/// Validate, run and return the summary.
pub fn run(config: &AuditConfig, sink: &mut ReportSink) -> Result<OperationSummary> {
    let mut auditor = Auditor::new(config)?;
    auditor.run(sink)?;
    Ok(auditor.into_summary())
}

fn required<'p>(path: Option<&'p PathBuf>, flag: &str) -> Result<&'p Path> {
    path.map(PathBuf::as_path)
        .ok_or_else(|| AuditError::config(format!("{flag} is required")))
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn note_anomaly(summary: &mut OperationSummary, sink: &mut ReportSink, anomaly: Anomaly) -> Result<()> {
    sink.misc(&anomaly)?;
    summary.anomalies.push(anomaly);
    Ok(())
}

fn blob_filter_banner(ctx: &Context<'_>, sink: &mut ReportSink) -> Result<()> {
    if let Some(keys) = &ctx.filter {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        sink.misc(format!("Blobs to look out for :: [{}]", keys.join(", ")))?;
    }
    Ok(())
}

/// Dump one snapshot, handing each entry to `action`. Returns entries read.
fn read_snapshot(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
    path: &Path,
    replica: &str,
    mut action: EntryAction<'_>,
) -> Result<u64> {
    let name = file_name(path);
    sink.misc(format!("Dumping index {name} for {replica}"))?;
    let mut reader = IndexSnapshotReader::open(path, ctx.keys.as_ref())?;
    let header = *reader.header();
    sink.misc(format!("version {}", header.version))?;
    sink.misc(format!("key size {}", header.key_size))?;
    sink.misc(format!("value size {}", header.value_size))?;
    sink.misc(format!("file end pointer {}", header.file_end_pointer))?;

    let mut processed = 0;
    while let Some(entry) = reader.next() {
        let entry = entry?;
        processed += 1;
        summary.entries_processed += 1;
        let wanted = ctx.wanted(&entry.key);
        match &mut action {
            EntryAction::Dump => {
                if wanted {
                    sink.record(&entry)?;
                }
            }
            EntryAction::DumpAndCollect(entries) => {
                if wanted {
                    sink.record(&entry)?;
                }
                entries.push(entry);
            }
            EntryAction::TrackActive(active) => {
                if wanted {
                    if let Some(anomaly) = active.observe(&entry, ctx.now_ms) {
                        note_anomaly(summary, sink, anomaly)?;
                    }
                }
            }
        }
        for anomaly in reader.drain_anomalies() {
            note_anomaly(summary, sink, anomaly)?;
        }
    }

    let trailer = reader.finish()?;
    sink.misc(format!("crc {}", trailer.crc.stored))?;
    if let Some(anomaly) = trailer.crc.checksum_anomaly(&format!("index {name}")) {
        summary.checksum_mismatches += 1;
        note_anomaly(summary, sink, anomaly)?;
    }
    sink.misc(format!("Total number of keys processed {processed}"))?;
    summary.files_read += 1;
    Ok(processed)
}

/// Report a snapshot that could not be read and keep going.
fn skip_failed_file(
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
    path: &Path,
    err: &AuditError,
) -> Result<()> {
    error!(target: TARGET, path = %path.display(), error = %err, "snapshot unreadable, continuing");
    summary.files_failed += 1;
    sink.misc(format!("Failed to read index {}: {err}", file_name(path)))
}

fn dump_index(ctx: &Context<'_>, summary: &mut OperationSummary, sink: &mut ReportSink) -> Result<()> {
    let path = required(ctx.config.file.as_ref(), "--file")?;
    read_snapshot(ctx, summary, sink, path, UNKNOWN_REPLICA, EntryAction::Dump).map(|_| ())
}

fn dump_indexes_for_replica(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
) -> Result<()> {
    let dir = required(ctx.config.replica_dir.as_ref(), "--replica-dir")?;
    let replica = replica_name(dir);
    sink.misc(format!("Root directory for replica : {}", dir.display()))?;

    let mut statuses = BlobStatusMap::new();
    for path in list_snapshots(dir, ctx.config.snapshot_order)? {
        let mut entries = Vec::new();
        let action = EntryAction::DumpAndCollect(&mut entries);
        if let Err(err) = read_snapshot(ctx, summary, sink, &path, &replica, action) {
            skip_failed_file(summary, sink, &path, &err)?;
        }
        let (folded, anomalies) = BlobStatusMap::fold_snapshot(&entries, &replica, ctx.now_ms);
        let (merged, merge_anomalies) = statuses.merge(folded);
        statuses = merged;
        for anomaly in anomalies.into_iter().chain(merge_anomalies) {
            note_anomaly(summary, sink, anomaly)?;
        }
    }

    for (key, status) in statuses.iter() {
        if ctx.wanted(key) {
            sink.record(format!("{key} : {status}"))?;
        }
    }
    sink.misc(format!(
        "Total Keys processed for replica {replica} : {}",
        statuses.entries_processed()
    ))
}

/// Fold every snapshot of the replica into an active-blob set.
fn collect_active_blobs(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
) -> Result<(String, ActiveBlobSet)> {
    let dir = required(ctx.config.replica_dir.as_ref(), "--replica-dir")?;
    let replica = replica_name(dir);
    let mut active = ActiveBlobSet::new();
    for path in list_snapshots(dir, ctx.config.snapshot_order)? {
        let action = EntryAction::TrackActive(&mut active);
        if let Err(err) = read_snapshot(ctx, summary, sink, &path, &replica, action) {
            skip_failed_file(summary, sink, &path, &err)?;
        }
    }
    Ok((replica, active))
}

fn write_active(sink: &mut ReportSink, active: &ActiveBlobSet) -> Result<()> {
    for (key, text) in active.iter() {
        sink.record(format!("{key} : {text}"))?;
    }
    Ok(())
}

fn dump_active_blobs_from_index(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
) -> Result<()> {
    let path = required(ctx.config.file.as_ref(), "--file")?;
    let mut active = ActiveBlobSet::new();
    let action = EntryAction::TrackActive(&mut active);
    let outcome = read_snapshot(ctx, summary, sink, path, UNKNOWN_REPLICA, action);
    write_active(sink, &active)?;
    sink.misc(format!("Total Keys processed {}", summary.entries_processed))?;
    outcome.map(|_| ())
}

fn dump_active_blobs_for_replica(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
) -> Result<()> {
    let (replica, active) = collect_active_blobs(ctx, summary, sink)?;
    write_active(sink, &active)?;
    sink.misc(format!(
        "Total Keys processed for replica {replica} : {}",
        summary.entries_processed
    ))
}

fn dump_n_random_active_blobs<R: Rng + ?Sized>(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
    rng: &mut R,
) -> Result<()> {
    let requested = ctx
        .config
        .active_blobs_count
        .ok_or_else(|| AuditError::config("--active-blobs-count is required"))?;
    let (replica, active) = collect_active_blobs(ctx, summary, sink)?;
    sink.misc(format!(
        "Total Keys processed for replica {replica} : {}",
        summary.entries_processed
    ))?;
    let records = active.records();
    sink.misc(format!("Total keys to be dumped {}", requested.min(records.len())))?;
    for record in sample(&records, requested, ctx.config.sample_strategy, rng) {
        sink.record(record)?;
    }
    Ok(())
}

fn dump_log(ctx: &Context<'_>, summary: &mut OperationSummary, sink: &mut ReportSink) -> Result<()> {
    let path = required(ctx.config.file.as_ref(), "--file")?;
    sink.misc("Dumping log")?;
    let source = LogSource::new(File::open(path)?)?;
    let options = ScanOptions {
        start_offset: ctx.config.start_offset.unwrap_or(0),
        end_offset: ctx.config.end_offset,
        key_filter: ctx.filter.clone(),
    };
    sink.misc(format!("Starting dumping from offset {}", options.start_offset))?;

    let mut scanner = LogScanner::new(source, ctx.keys.as_ref(), &MessageFormatV1, options);
    let mut fatal = None;
    let mut in_failure_run = false;
    for step in scanner.by_ref() {
        match step {
            ScanStep::Decoded(record) => {
                in_failure_run = false;
                sink.record(&record)?;
            }
            ScanStep::Skipped { offset, reason } => {
                if !in_failure_run {
                    in_failure_run = true;
                    sink.misc(format!(
                        "Unreadable record at {offset}, resynchronizing byte by byte: {reason}"
                    ))?;
                }
            }
            ScanStep::Fatal(err) => {
                sink.misc(format!("Log scan stopped: {err}"))?;
                fatal = Some(err);
            }
        }
    }

    let scan = scanner.into_summary();
    sink.misc(format!(
        "Scan ended at offset {}: {} records, {} decode failures in {} runs",
        scan.final_offset, scan.records_decoded, scan.decode_failures, scan.failure_runs
    ))?;
    summary.files_read += 1;
    summary.entries_processed = scan.records_decoded;
    summary.decode_failures = scan.decode_failures;
    summary.scan = Some(scan);
    fatal.map_or(Ok(()), Err)
}

fn dump_replica_token(ctx: &Context<'_>, summary: &mut OperationSummary, sink: &mut ReportSink) -> Result<()> {
    let path = required(ctx.config.file.as_ref(), "--file")?;
    sink.misc("Dumping replica token")?;
    let tokens = StoreFindTokenCodec::new(ctx.keys.as_ref());
    let mut reader = ReplicaTokenReader::open(path, &DefaultPartitionResolver, &tokens)?;
    sink.misc(format!("version {}", reader.version()))?;
    while let Some(record) = reader.next() {
        let record = record?;
        summary.entries_processed += 1;
        sink.record(&record)?;
    }
    let trailer = reader.finish()?;
    sink.misc(format!("crc {}", trailer.crc.stored))?;
    if let Some(anomaly) = trailer.crc.checksum_anomaly(&format!("replica token {}", file_name(path))) {
        summary.checksum_mismatches += 1;
        note_anomaly(summary, sink, anomaly)?;
    }
    summary.files_read += 1;
    Ok(())
}

fn compare_index_to_log(
    ctx: &Context<'_>,
    summary: &mut OperationSummary,
    sink: &mut ReportSink,
) -> Result<()> {
    let index_path = required(ctx.config.file.as_ref(), "--file")?;
    let log_path = required(ctx.config.log_file.as_ref(), "--log-file")?;
    sink.misc("Comparing Index entries to Log")?;

    let keys = ctx.keys.as_ref();
    let mut validator = CrossValidator::new(LogSource::new(File::open(log_path)?)?, keys, &MessageFormatV1);
    let mut reader = IndexSnapshotReader::open(index_path, keys)?;
    let header = *reader.header();
    sink.misc(format!("version {}", header.version))?;
    sink.misc(format!("key size {}", header.key_size))?;
    sink.misc(format!("value size {}", header.value_size))?;
    sink.misc(format!("file end pointer {}", header.file_end_pointer))?;

    while let Some(entry) = reader.next() {
        let entry = entry?;
        summary.entries_processed += 1;
        for anomaly in reader.drain_anomalies() {
            note_anomaly(summary, sink, anomaly)?;
        }
        if !ctx.wanted(&entry.key) {
            continue;
        }
        match validator.check(&entry) {
            Verdict::Match => {}
            Verdict::KeyMismatch(anomaly) => {
                summary.cross_validation_failures += 1;
                sink.record(format!("Failed for Index Entry {entry} : {anomaly}"))?;
                summary.anomalies.push(anomaly);
            }
            Verdict::Unreadable(err) => {
                summary.cross_validation_failures += 1;
                sink.record(format!("Failed for Index Entry {entry} : {err}"))?;
            }
        }
    }

    let trailer = reader.finish()?;
    sink.misc(format!("crc {}", trailer.crc.stored))?;
    if let Some(anomaly) = trailer.crc.checksum_anomaly(&format!("index {}", file_name(index_path))) {
        summary.checksum_mismatches += 1;
        note_anomaly(summary, sink, anomaly)?;
    }
    let tally = validator.tally();
    sink.misc(format!(
        "Total entries checked {}, matched {}, failed {}",
        tally.checked,
        tally.matched,
        tally.failures()
    ))?;
    summary.files_read += 2;
    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};

use blobscope_audit::{AuditConfig, Auditor, Operation, OperationSummary, ReportSink};
use blobscope_error::{AuditError, Result};
use blobscope_format::encode::{
    IndexSnapshotBuilder, ReplicaTokenFileBuilder, delete_record, encode_store_find_token,
    put_record, sample_properties,
};
use blobscope_types::{Anomaly, IndexFlags, IndexValue};
use tempfile::TempDir;

const NOW_MS: u64 = 1_000_000;

fn value(log_offset: i64, deleted: bool) -> IndexValue {
    IndexValue {
        log_offset,
        size: 64,
        original_message_offset: -1,
        flags: if deleted { IndexFlags::DELETE } else { IndexFlags::empty() },
        expires_at_ms: None,
    }
}

fn config(operation: Operation, key_width: usize) -> AuditConfig {
    AuditConfig {
        operation: Some(operation),
        key_width: Some(key_width),
        now_ms: Some(NOW_MS),
        seed: Some(42),
        ..AuditConfig::default()
    }
}

/// Run `config`, returning the outcome, the summary and the report lines.
fn run(config: &AuditConfig, scratch: &Path) -> (Result<()>, OperationSummary, Vec<String>) {
    let report = scratch.join("report.txt");
    let mut sink = ReportSink::create(&report, config.exclude_misc_logging).expect("report file");
    let mut auditor = Auditor::new(config).expect("valid config");
    let outcome = auditor.run(&mut sink);
    sink.finish().expect("flush report");
    let lines = fs::read_to_string(&report)
        .expect("read report")
        .lines()
        .map(str::to_owned)
        .collect();
    (outcome, auditor.into_summary(), lines)
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write fixture");
    path
}

fn replica_dir(scratch: &TempDir) -> PathBuf {
    let dir = scratch.path().join("replica-7");
    fs::create_dir(&dir).expect("mkdir replica");
    dir
}

#[test]
fn deleted_key_is_not_active_in_single_file() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let index = IndexSnapshotBuilder::new(8, 24)
        .entry(b"K1______", &value(0, false))
        .entry(b"K1______", &value(100, true))
        .build();
    let path = write(scratch.path(), "0_index", &index);

    let mut cfg = config(Operation::DumpActiveBlobsFromIndex, 8);
    cfg.file = Some(path);
    cfg.exclude_misc_logging = true;
    let (outcome, summary, lines) = run(&cfg, scratch.path());

    outcome.expect("run succeeds");
    assert!(lines.is_empty(), "unexpected output: {lines:?}");
    assert_eq!(summary.entries_processed, 2);
    assert_eq!(summary.records_emitted, 0);
    assert!(summary.anomalies.is_empty());
}

#[test]
fn deleted_key_is_not_active_across_replica() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let dir = replica_dir(&scratch);
    write(
        &dir,
        "0_index",
        &IndexSnapshotBuilder::new(8, 24)
            .entry(b"K1______", &value(0, false))
            .entry(b"K1______", &value(100, true))
            .entry(b"K2______", &value(200, false))
            .build(),
    );

    let mut cfg = config(Operation::DumpActiveBlobsForReplica, 8);
    cfg.replica_dir = Some(dir);
    let (outcome, summary, lines) = run(&cfg, scratch.path());

    outcome.expect("run succeeds");
    assert_eq!(summary.entries_processed, 3);
    let records: Vec<&String> = lines.iter().filter(|line| line.contains(" : key ")).collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].starts_with("4b325f5f5f5f5f5f : key 4b325f5f5f5f5f5f"));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("Total Keys processed for replica replica-7 : 3")
    );
}

#[test]
fn active_blob_totals_count_filtered_out_entries() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let dir = replica_dir(&scratch);
    let index = IndexSnapshotBuilder::new(8, 24)
        .entry(b"K1______", &value(0, false))
        .entry(b"K2______", &value(100, false))
        .entry(b"K3______", &value(200, false))
        .build();
    let path = write(&dir, "0_index", &index);
    let wanted = "4b325f5f5f5f5f5f".to_owned();

    let mut cfg = config(Operation::DumpActiveBlobsFromIndex, 8);
    cfg.file = Some(path);
    cfg.blobs = vec![wanted.clone()];
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("run succeeds");
    assert_eq!(summary.entries_processed, 3);
    assert_eq!(lines.iter().filter(|line| line.contains(" : key ")).count(), 1);
    assert_eq!(lines.last().map(String::as_str), Some("Total Keys processed 3"));

    for operation in [
        Operation::DumpActiveBlobsForReplica,
        Operation::DumpNRandomActiveBlobsForReplica,
    ] {
        let mut cfg = config(operation, 8);
        cfg.replica_dir = Some(dir.clone());
        cfg.blobs = vec![wanted.clone()];
        cfg.active_blobs_count = Some(5);
        let (outcome, _, lines) = run(&cfg, scratch.path());
        outcome.expect("run succeeds");
        assert!(
            lines.contains(&"Total Keys processed for replica replica-7 : 3".to_owned()),
            "{operation:?}: {lines:?}"
        );
    }
}

#[test]
fn random_sample_is_capped_at_active_count() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let dir = replica_dir(&scratch);
    write(
        &dir,
        "0_index",
        &IndexSnapshotBuilder::new(4, 24)
            .entry(b"aaaa", &value(0, false))
            .entry(b"bbbb", &value(100, false))
            .entry(b"cccc", &value(200, false))
            .build(),
    );

    let mut cfg = config(Operation::DumpNRandomActiveBlobsForReplica, 4);
    cfg.replica_dir = Some(dir);
    cfg.active_blobs_count = Some(5);
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("run succeeds");

    let tail = &lines[lines.len() - 5..];
    assert_eq!(tail[0], "Total Keys processed for replica replica-7 : 3");
    assert_eq!(tail[1], "Total keys to be dumped 3");
    assert!(tail[2..].iter().all(|line| line.starts_with("key ")));
    assert_eq!(summary.records_emitted, 3);

    cfg.exclude_misc_logging = true;
    let (_, _, quiet) = run(&cfg, scratch.path());
    assert_eq!(quiet.len(), 3);
    assert_eq!(quiet, tail[2..].to_vec());
}

#[test]
fn put_after_delete_across_snapshots_is_reported_once() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let dir = replica_dir(&scratch);
    write(
        &dir,
        "0_index",
        &IndexSnapshotBuilder::new(4, 24)
            .entry(b"aaaa", &value(0, false))
            .entry(b"aaaa", &value(100, true))
            .build(),
    );
    write(
        &dir,
        "4096_index",
        &IndexSnapshotBuilder::new(4, 24)
            .entry(b"aaaa", &value(4096, false))
            .entry(b"bbbb", &value(4200, false))
            .build(),
    );

    let mut cfg = config(Operation::DumpIndexesForReplica, 4);
    cfg.replica_dir = Some(dir);
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("run succeeds");

    assert_eq!(summary.files_read, 2);
    assert_eq!(summary.entries_processed, 4);
    assert_eq!(
        summary.anomalies,
        vec![Anomaly::PutAfterDelete {
            key: "61616161".to_owned(),
            replica: "replica-7".to_owned(),
        }]
    );
    assert!(lines.contains(&"61616161 : available [replica-7] deletedOrExpired [replica-7]".to_owned()));
    assert!(lines.contains(&"62626262 : available [replica-7] deletedOrExpired []".to_owned()));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("Total Keys processed for replica replica-7 : 4")
    );
}

#[test]
fn unreadable_snapshot_is_skipped() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let dir = replica_dir(&scratch);
    write(
        &dir,
        "0_index",
        &IndexSnapshotBuilder::new(4, 24).entry(b"aaaa", &value(0, false)).build(),
    );
    write(&dir, "50_index", &[0, 9, 0, 0]);
    write(
        &dir,
        "100_index",
        &IndexSnapshotBuilder::new(4, 24).entry(b"bbbb", &value(100, false)).build(),
    );

    let mut cfg = config(Operation::DumpActiveBlobsForReplica, 4);
    cfg.replica_dir = Some(dir);
    let (outcome, summary, lines) = run(&cfg, scratch.path());

    outcome.expect("run continues past the bad file");
    assert_eq!(summary.files_read, 2);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(summary.records_emitted, 2);
    assert!(lines.iter().any(|line| line.starts_with("Failed to read index 50_index")));
}

#[test]
fn single_index_dump_honours_filter_and_checksum() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let mut index = IndexSnapshotBuilder::new(4, 32)
        .file_end_pointer(300)
        .entry(b"aaaa", &value(0, false))
        .entry(b"bbbb", &value(100, true))
        .build();
    let last = index.len() - 1;
    index[last] ^= 0xFF;
    let path = write(scratch.path(), "0_index", &index);

    let mut cfg = config(Operation::DumpIndex, 4);
    cfg.file = Some(path);
    cfg.blobs = vec!["62626262".to_owned()];
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("crc mismatch is not fatal");

    assert_eq!(lines[0], "Blobs to look out for :: [62626262]");
    assert_eq!(lines[1], "Dumping index 0_index for unknown");
    assert!(lines.contains(&"file end pointer 300".to_owned()));
    let records: Vec<&String> = lines.iter().filter(|line| line.starts_with("key ")).collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].contains("offset 100") && records[0].contains("Flag true"));
    assert_eq!(summary.entries_processed, 2);
    assert_eq!(summary.checksum_mismatches, 1);
    assert!(matches!(summary.anomalies[..], [Anomaly::ChecksumMismatch { .. }]));
    assert_eq!(lines.last().map(String::as_str), Some("Total number of keys processed 2"));
}

#[test]
fn log_dump_prints_records_in_range() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let first = put_record(b"aaaa", &sample_properties(3), b"m", b"xyz");
    let mut log = first.clone();
    log.extend(delete_record(b"bbbb", true));
    let path = write(scratch.path(), "log_current", &log);

    let mut cfg = config(Operation::DumpLog, 4);
    cfg.file = Some(path.clone());
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("scan succeeds");
    assert_eq!(lines[0], "Dumping log");
    assert_eq!(lines[1], "Starting dumping from offset 0");
    assert_eq!(lines.iter().filter(|line| line.starts_with("Header - ")).count(), 2);
    assert_eq!(summary.records_emitted, 2);
    assert_eq!(summary.decode_failures, 0);
    assert_eq!(summary.scan.as_ref().map(|scan| scan.final_offset), Some(log.len() as u64));

    cfg.start_offset = Some(first.len() as u64);
    cfg.exclude_misc_logging = true;
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("scan succeeds");
    assert_eq!(summary.records_emitted, 1);
    assert!(lines.iter().any(|line| line.contains("delete change true")));
}

#[test]
fn replica_token_dump_lists_every_peer() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let file = ReplicaTokenFileBuilder::new()
        .record(3, "host-a", "/mnt/u1/p3", 15088, 1024, &encode_store_find_token("s-1", 4096, Some(b"abcd")))
        .record(3, "host-b", "/mnt/u2/p3", 15088, 0, &encode_store_find_token("s-2", -1, None))
        .build();
    let path = write(scratch.path(), "replicaTokens", &file);

    let mut cfg = config(Operation::DumpReplicatoken, 4);
    cfg.file = Some(path);
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("token file decodes");

    assert_eq!(lines[0], "Dumping replica token");
    assert_eq!(lines[1], "version 0");
    let peers: Vec<&String> = lines.iter().filter(|line| line.starts_with("partitionId")).collect();
    assert_eq!(peers.len(), 2);
    assert!(peers[0].contains("hostname host-a") && peers[0].contains("logOffset 4096"));
    assert!(peers[1].contains("storeKey none"));
    assert_eq!(summary.entries_processed, 2);
    assert_eq!(summary.checksum_mismatches, 0);
}

#[test]
fn compare_index_to_log_counts_failures() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let first = put_record(b"aaaa", &sample_properties(2), b"", b"hi");
    let mut log = first.clone();
    log.extend(delete_record(b"bbbb", true));
    let log_path = write(scratch.path(), "log_current", &log);
    let second = first.len() as i64;

    let consistent = IndexSnapshotBuilder::new(4, 24)
        .entry(b"aaaa", &value(0, false))
        .entry(b"bbbb", &value(second, true))
        .build();
    let mut cfg = config(Operation::CompareIndexToLog, 4);
    cfg.file = Some(write(scratch.path(), "0_index", &consistent));
    cfg.log_file = Some(log_path.clone());
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("comparison runs");
    assert_eq!(summary.cross_validation_failures, 0);
    assert_eq!(summary.records_emitted, 0);
    assert_eq!(
        lines.last().map(String::as_str),
        Some("Total entries checked 2, matched 2, failed 0")
    );

    let broken = IndexSnapshotBuilder::new(4, 24)
        .entry(b"aaaa", &value(second, false))
        .entry(b"bbbb", &value(1, true))
        .build();
    cfg.file = Some(write(scratch.path(), "1_index", &broken));
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    outcome.expect("comparison runs");
    assert_eq!(summary.cross_validation_failures, 2);
    assert!(matches!(summary.anomalies[..], [Anomaly::KeyMismatch { .. }]));
    let failures: Vec<&String> = lines
        .iter()
        .filter(|line| line.starts_with("Failed for Index Entry key "))
        .collect();
    assert_eq!(failures.len(), 2);
}

#[test]
fn missing_inputs_are_config_errors() {
    let cfg = config(Operation::CompareIndexToLog, 4);
    assert!(matches!(Auditor::new(&cfg), Err(AuditError::Config { .. })));

    let mut cfg = config(Operation::DumpNRandomActiveBlobsForReplica, 4);
    cfg.replica_dir = Some(PathBuf::from("/nonexistent"));
    assert!(matches!(Auditor::new(&cfg), Err(AuditError::Config { .. })));
}

#[test]
fn single_file_failure_stops_the_run() {
    let scratch = tempfile::tempdir().expect("temp dir");
    let mut index = IndexSnapshotBuilder::new(4, 24)
        .entry(b"aaaa", &value(0, false))
        .build();
    index.truncate(index.len() - 3);
    let path = write(scratch.path(), "0_index", &index);

    let mut cfg = config(Operation::DumpActiveBlobsFromIndex, 4);
    cfg.file = Some(path);
    let (outcome, summary, lines) = run(&cfg, scratch.path());
    assert!(outcome.is_err());
    assert_eq!(summary.entries_processed, 1);
    assert!(lines.iter().any(|line| line.starts_with("61616161 : key 61616161")));
}

use std::fs::File;
use std::io::Write;

use blobscope_format::encode;
use blobscope_format::{LogScanner, LogSource, MessageFormatV1, ScanOptions, ScanStep, ScanSummary};
use blobscope_types::FixedWidthKeyCodec;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KEY_WIDTH: usize = 8;

fn write_log(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp log");
    file.write_all(bytes).expect("write log");
    file.flush().expect("flush log");
    file
}

fn scan_file(file: &tempfile::NamedTempFile, options: ScanOptions) -> (Vec<ScanStep>, ScanSummary) {
    let source = LogSource::new(File::open(file.path()).expect("open log")).expect("source");
    let keys = FixedWidthKeyCodec::new(KEY_WIDTH);
    let mut scanner = LogScanner::new(source, &keys, &MessageFormatV1, options);
    let steps: Vec<_> = scanner.by_ref().collect();
    (steps, scanner.into_summary())
}

/// Noise that can never open a version-1 structure.
fn noise(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| match rng.gen_range(0u8..=255) {
            0 => 0xFF,
            byte => byte,
        })
        .collect()
}

#[test]
fn one_record_followed_by_sixty_noise_bytes() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0B);
    let record = encode::put_record(b"blob-001", &encode::sample_properties(4), b"", b"data");
    let record_len = record.len() as u64;
    let mut log = record;
    log.extend(noise(&mut rng, 60));
    let file = write_log(&log);

    let (steps, summary) = scan_file(&file, ScanOptions::default());

    let decoded: Vec<_> = steps
        .iter()
        .filter_map(|step| match step {
            ScanStep::Decoded(record) => Some(record.offset),
            _ => None,
        })
        .collect();
    let skipped: Vec<_> = steps
        .iter()
        .filter_map(|step| match step {
            ScanStep::Skipped { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(decoded, vec![0]);
    assert_eq!(skipped.len(), 60);
    assert_eq!(skipped, (record_len..record_len + 60).collect::<Vec<_>>());
    assert!(!steps.iter().any(|step| matches!(step, ScanStep::Fatal(_))));
    assert_eq!(summary.decode_failures, 60);
    assert_eq!(summary.failure_runs, 1);
    assert_eq!(summary.final_offset, log.len() as u64);
    assert_eq!(summary.fatal, None);
}

#[test]
fn range_scan_starts_mid_file() {
    let first = encode::delete_record(b"blob-001", true);
    let second = encode::put_record(b"blob-002", &encode::sample_properties(1), b"m", b"x");
    let third = encode::delete_record(b"blob-002", false);
    let mut log = first.clone();
    log.extend(&second);
    let end = log.len() as u64;
    log.extend(third);
    let file = write_log(&log);

    let (steps, summary) = scan_file(
        &file,
        ScanOptions {
            start_offset: first.len() as u64,
            end_offset: Some(end),
            key_filter: None,
        },
    );
    assert_eq!(steps.len(), 1);
    assert!(matches!(&steps[0], ScanStep::Decoded(r) if r.key.as_bytes() == b"blob-002"));
    assert_eq!(summary.final_offset, end);
}

#[test]
fn corrupt_blob_length_is_skipped_and_the_scan_continues() {
    let good = encode::put_record(b"blob-001", &encode::sample_properties(4), b"meta", b"data");
    let mut corrupt = encode::put_record(b"blob-002", &encode::sample_properties(4), b"meta", b"data");
    let blob_size_at = corrupt.len() - (2 + 8 + 4 + 8) + 2;
    corrupt[blob_size_at..blob_size_at + 8].copy_from_slice(&(1i64 << 40).to_be_bytes());

    let mut log = good.clone();
    log.extend(&corrupt);
    for _ in 0..100 {
        log.extend(encode::delete_record(b"blob-003", true));
    }
    let file = write_log(&log);

    let (steps, summary) = scan_file(&file, ScanOptions::default());
    assert!(!steps.iter().any(|step| matches!(step, ScanStep::Fatal(_))));
    assert!(matches!(&steps[0], ScanStep::Decoded(r) if r.key.as_bytes() == b"blob-001"));
    assert_eq!(summary.records_decoded, 101);
    assert_eq!(summary.decode_failures, corrupt.len() as u64);
    assert_eq!(summary.failure_runs, 1);
    assert_eq!(summary.fatal, None);
    assert_eq!(summary.final_offset, log.len() as u64);
}

#[derive(Debug, Clone)]
enum RecordShape {
    Put { key: [u8; KEY_WIDTH], metadata: Vec<u8>, data: Vec<u8> },
    Delete { key: [u8; KEY_WIDTH], flag: bool },
}

impl RecordShape {
    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Put { key, metadata, data } => {
                encode::put_record(key, &encode::sample_properties(data.len() as i64), metadata, data)
            }
            Self::Delete { key, flag } => encode::delete_record(key, *flag),
        }
    }
}

fn record_shape() -> impl Strategy<Value = RecordShape> {
    prop_oneof![
        (
            any::<[u8; KEY_WIDTH]>(),
            proptest::collection::vec(any::<u8>(), 0..32),
            proptest::collection::vec(any::<u8>(), 0..256)
        )
            .prop_map(|(key, metadata, data)| RecordShape::Put { key, metadata, data }),
        (any::<[u8; KEY_WIDTH]>(), any::<bool>()).prop_map(|(key, flag)| RecordShape::Delete { key, flag }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn next_offset_is_offset_plus_total_size(shapes in proptest::collection::vec(record_shape(), 1..12)) {
        let encoded: Vec<Vec<u8>> = shapes.iter().map(RecordShape::encode).collect();
        let log: Vec<u8> = encoded.concat();
        let file = write_log(&log);
        let (steps, summary) = scan_file(&file, ScanOptions::default());

        prop_assert_eq!(steps.len(), shapes.len());
        let mut expected_offset = 0u64;
        for (step, bytes) in steps.iter().zip(&encoded) {
            let ScanStep::Decoded(record) = step else {
                return Err(TestCaseError::fail(format!("unexpected step {step:?}")));
            };
            prop_assert_eq!(record.offset, expected_offset);
            prop_assert_eq!(
                record.next_offset(),
                record.offset + record.header.header_size
                    + record.header.message_size as u64
                    + record.encoded_key_size()
            );
            prop_assert_eq!(record.total_size(), bytes.len() as u64);
            expected_offset = record.next_offset();
        }
        prop_assert_eq!(summary.final_offset, log.len() as u64);
    }

    #[test]
    fn every_failure_is_retried_one_byte_later(seed in any::<u64>(), garbage in 1usize..40) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut log = noise(&mut rng, garbage);
        log.extend(encode::delete_record(b"resynced", true));
        let file = write_log(&log);
        let (steps, summary) = scan_file(&file, ScanOptions::default());

        let mut previous_failure: Option<u64> = None;
        for step in &steps {
            match step {
                ScanStep::Skipped { offset, .. } => {
                    if let Some(previous) = previous_failure {
                        prop_assert_eq!(*offset, previous + 1);
                    } else {
                        prop_assert_eq!(*offset, 0);
                    }
                    previous_failure = Some(*offset);
                }
                ScanStep::Decoded(record) => prop_assert_eq!(record.offset, garbage as u64),
                ScanStep::Fatal(err) => return Err(TestCaseError::fail(format!("fatal: {err}"))),
            }
        }
        prop_assert_eq!(summary.decode_failures, garbage as u64);
        prop_assert_eq!(summary.records_decoded, 1);
    }
}

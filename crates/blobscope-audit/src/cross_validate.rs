//! Checking index entries against the log they point into.
//!
//! Each entry's `log_offset` is taken as exact: one record is decoded there
//! with no resynchronization, and its key must equal the entry's key.

use std::io::{Read, Seek};

use blobscope_error::AuditError;
use blobscope_format::{LogSource, MessageCodec, read_record_at};
use blobscope_types::{Anomaly, IndexEntry, KeyCodec};
use serde::Serialize;
use tracing::{debug, warn};

const TARGET: &str = "blobscope.audit::cross_validate";

/// Result of checking one entry.
#[derive(Debug)]
pub enum Verdict {
    Match,
    KeyMismatch(Anomaly),
    /// Nothing decodable at the entry's offset.
    Unreadable(AuditError),
}

impl Verdict {
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrossValidationTally {
    pub checked: u64,
    pub matched: u64,
    pub key_mismatches: u64,
    pub unreadable: u64,
}

impl CrossValidationTally {
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.key_mismatches + self.unreadable
    }
}

pub struct CrossValidator<'c, S> {
    log: LogSource<S>,
    keys: &'c dyn KeyCodec,
    messages: &'c dyn MessageCodec,
    tally: CrossValidationTally,
}

impl<'c, S: Read + Seek> CrossValidator<'c, S> {
    pub fn new(log: LogSource<S>, keys: &'c dyn KeyCodec, messages: &'c dyn MessageCodec) -> Self {
        Self {
            log,
            keys,
            messages,
            tally: CrossValidationTally::default(),
        }
    }

    pub fn check(&mut self, entry: &IndexEntry) -> Verdict {
        self.tally.checked += 1;
        let verdict = match u64::try_from(entry.value.log_offset) {
            Err(_) => Verdict::Unreadable(AuditError::decode(
                0,
                format!("negative log offset {}", entry.value.log_offset),
            )),
            Ok(offset) => match read_record_at(&mut self.log, offset, self.keys, self.messages) {
                Ok(record) if record.key == entry.key => Verdict::Match,
                Ok(record) => Verdict::KeyMismatch(Anomaly::KeyMismatch {
                    index_key: entry.key.id(),
                    log_key: record.key.id(),
                    log_offset: offset,
                }),
                Err(err) => Verdict::Unreadable(err),
            },
        };

        match &verdict {
            Verdict::Match => {
                self.tally.matched += 1;
                debug!(target: TARGET, key = %entry.key, offset = entry.value.log_offset, "entry matches log");
            }
            Verdict::KeyMismatch(anomaly) => {
                self.tally.key_mismatches += 1;
                warn!(target: TARGET, %anomaly, "key mismatch");
            }
            Verdict::Unreadable(err) => {
                self.tally.unreadable += 1;
                warn!(
                    target: TARGET,
                    key = %entry.key,
                    offset = entry.value.log_offset,
                    error = %err,
                    "no record at index offset"
                );
            }
        }
        verdict
    }

    #[must_use]
    pub const fn tally(&self) -> CrossValidationTally {
        self.tally
    }
}

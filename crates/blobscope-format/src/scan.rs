//! Sequential log scanning with byte-wise resynchronization.
//!
//! [`LogScanner`] walks a segment log from a start offset to an end offset and
//! yields one [`ScanStep`] per decode attempt:
//! - `Decoded` advances by the record's total size.
//! - `Skipped` advances by exactly one byte.
//! - `Fatal` ends the scan (end of input inside a recognized structure, or I/O).
//!
//! The file is read through a [`LogSource`] window so that scanning a large
//! log never loads it whole.

use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom};

use blobscope_error::{AuditError, Result};
use blobscope_types::{ByteCursor, KeyCodec, LogRecord};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec::{MessageCodec, decode_log_record};

const TARGET: &str = "blobscope.format::scan";

/// Smallest window a [`LogSource`] loads at a time.
pub const MIN_WINDOW_BYTES: usize = 64 * 1024;

/// Windowed random-access reader over a log file.
///
/// `decode_at` hands a decoder a cursor starting at the requested offset and
/// grows the window whenever the decoder runs out of bytes before the end of
/// the file, so an end-of-input error always means the file itself ended.
#[derive(Debug)]
pub struct LogSource<S> {
    inner: S,
    len: u64,
    window: Vec<u8>,
    window_start: u64,
}

impl<S: Read + Seek> LogSource<S> {
    pub fn new(mut inner: S) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            len,
            window: Vec::new(),
            window_start: 0,
        })
    }

    /// Length of the underlying file.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    fn is_resident(&self, offset: u64) -> bool {
        offset >= self.window_start && offset < self.window_end()
    }

    /// Make `[offset, offset + want)` resident, clipped to the file length.
    ///
    /// Resident bytes from `offset` on are kept and only the missing tail is
    /// read, so a forward scan reads each byte of the file once.
    fn fill(&mut self, offset: u64, want: usize) -> Result<()> {
        let end = offset.saturating_add(want as u64).min(self.len);
        if offset >= self.window_start && end <= self.window_end() {
            return Ok(());
        }
        if self.is_resident(offset) {
            self.window.drain(..(offset - self.window_start) as usize);
        } else {
            self.window.clear();
        }
        self.window_start = offset;

        let have = self.window_end();
        if end > have {
            let kept = self.window.len();
            self.window.resize(kept + (end - have) as usize, 0);
            self.inner.seek(SeekFrom::Start(have))?;
            self.inner.read_exact(&mut self.window[kept..])?;
        }
        Ok(())
    }

    /// Run `decode` on a cursor positioned at `offset`.
    ///
    /// The decoder first sees whatever is already resident; the window only
    /// grows when it runs out of bytes before the end of the file.
    pub fn decode_at<T>(
        &mut self,
        offset: u64,
        mut decode: impl FnMut(&mut ByteCursor<'_>) -> Result<T>,
    ) -> Result<T> {
        if !self.is_resident(offset) {
            self.fill(offset, MIN_WINDOW_BYTES)?;
        }
        loop {
            let rel = offset.saturating_sub(self.window_start) as usize;
            let slice = self.window.get(rel..).unwrap_or_default();
            let mut cursor = ByteCursor::new(slice, offset);
            match decode(&mut cursor) {
                Err(err) if err.is_end_of_input() && self.window_end() < self.len => {
                    let resident = (self.window_end() - offset) as usize;
                    self.fill(offset, resident.max(MIN_WINDOW_BYTES / 2).saturating_mul(2))?;
                }
                other => return other,
            }
        }
    }
}

/// Decode exactly one record at `offset`, without resynchronization.
pub fn read_record_at<S: Read + Seek>(
    source: &mut LogSource<S>,
    offset: u64,
    keys: &dyn KeyCodec,
    messages: &dyn MessageCodec,
) -> Result<LogRecord> {
    source.decode_at(offset, |cursor| decode_log_record(cursor, keys, messages))
}

/// Range and filter for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub start_offset: u64,
    /// Defaults to the file length; clamped to it.
    pub end_offset: Option<u64>,
    /// Emit only records whose rendered key is listed.
    pub key_filter: Option<BTreeSet<String>>,
}

/// Outcome of one decode attempt.
#[derive(Debug)]
pub enum ScanStep {
    Decoded(LogRecord),
    Skipped { offset: u64, reason: AuditError },
    Fatal(AuditError),
}

/// Counters for a finished or abandoned scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub start_offset: u64,
    pub end_offset: u64,
    pub final_offset: u64,
    pub records_decoded: u64,
    pub records_emitted: u64,
    pub decode_failures: u64,
    /// Contiguous runs of decode failures.
    pub failure_runs: u64,
    pub fatal: Option<String>,
}

/// Lazy scan over a log, see the module docs.
pub struct LogScanner<'c, S> {
    source: LogSource<S>,
    keys: &'c dyn KeyCodec,
    messages: &'c dyn MessageCodec,
    filter: Option<BTreeSet<String>>,
    current: u64,
    end: u64,
    in_failure_run: bool,
    done: bool,
    summary: ScanSummary,
}

impl<'c, S: Read + Seek> LogScanner<'c, S> {
    pub fn new(
        source: LogSource<S>,
        keys: &'c dyn KeyCodec,
        messages: &'c dyn MessageCodec,
        options: ScanOptions,
    ) -> Self {
        let end = options
            .end_offset
            .map_or(source.len(), |end| end.min(source.len()));
        let start = options.start_offset;
        info!(
            target: TARGET,
            start_offset = start,
            end_offset = end,
            file_len = source.len(),
            filtered = options.key_filter.is_some(),
            "starting log scan"
        );
        Self {
            source,
            keys,
            messages,
            filter: options.key_filter,
            current: start,
            end,
            in_failure_run: false,
            done: false,
            summary: ScanSummary {
                start_offset: start,
                end_offset: end,
                final_offset: start,
                ..ScanSummary::default()
            },
        }
    }

    /// Offset of the next decode attempt.
    #[must_use]
    pub const fn current_offset(&self) -> u64 {
        self.current
    }

    #[must_use]
    pub const fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ScanSummary {
        self.summary
    }

    fn wanted(&self, record: &LogRecord) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|keys| keys.contains(&record.key.id()))
    }

    fn end_failure_run(&mut self) {
        if self.in_failure_run {
            self.in_failure_run = false;
            debug!(target: TARGET, offset = self.current, "resynchronized");
        }
    }
}

impl<S: Read + Seek> Iterator for LogScanner<'_, S> {
    type Item = ScanStep;

    fn next(&mut self) -> Option<ScanStep> {
        while !self.done {
            if self.current >= self.end {
                self.done = true;
                self.summary.final_offset = self.current;
                info!(
                    target: TARGET,
                    final_offset = self.current,
                    records = self.summary.records_decoded,
                    decode_failures = self.summary.decode_failures,
                    "log scan complete"
                );
                return None;
            }

            let offset = self.current;
            let (keys, messages) = (self.keys, self.messages);
            match read_record_at(&mut self.source, offset, keys, messages) {
                Ok(record) => {
                    self.end_failure_run();
                    self.current = record.next_offset();
                    self.summary.final_offset = self.current;
                    self.summary.records_decoded += 1;
                    debug!(
                        target: TARGET,
                        offset,
                        key = %record.key,
                        total_size = record.total_size(),
                        delete = record.is_delete(),
                        "decoded record"
                    );
                    if self.wanted(&record) {
                        self.summary.records_emitted += 1;
                        return Some(ScanStep::Decoded(record));
                    }
                }
                Err(reason) if reason.is_recoverable() => {
                    if !self.in_failure_run {
                        self.in_failure_run = true;
                        self.summary.failure_runs += 1;
                        warn!(
                            target: TARGET,
                            offset,
                            reason = %reason,
                            "decode failure, resynchronizing byte by byte"
                        );
                    }
                    self.summary.decode_failures += 1;
                    self.current = offset + 1;
                    self.summary.final_offset = self.current;
                    return Some(ScanStep::Skipped { offset, reason });
                }
                Err(reason) => {
                    self.done = true;
                    self.summary.fatal = Some(reason.to_string());
                    error!(target: TARGET, offset, reason = %reason, "log scan aborted");
                    return Some(ScanStep::Fatal(reason));
                }
            }
        }
        None
    }
}

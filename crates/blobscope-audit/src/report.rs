//! Report output and the per-run summary.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use blobscope_error::Result;
use blobscope_format::ScanSummary;
use blobscope_types::Anomaly;
use serde::Serialize;

use crate::config::Operation;

/// Line-oriented report writer over stdout or a file.
///
/// Record lines are always written. Misc lines (banners, header fields,
/// totals, anomalies, CRC values) are dropped when `exclude_misc` is set.
/// Buffered output is flushed by [`ReportSink::finish`] and again on drop.
pub struct ReportSink {
    out: BufWriter<Box<dyn Write>>,
    exclude_misc: bool,
    records: u64,
    misc: u64,
}

impl ReportSink {
    pub fn new(out: Box<dyn Write>, exclude_misc: bool) -> Self {
        Self {
            out: BufWriter::new(out),
            exclude_misc,
            records: 0,
            misc: 0,
        }
    }

    pub fn stdout(exclude_misc: bool) -> Self {
        Self::new(Box::new(io::stdout()), exclude_misc)
    }

    pub fn create(path: &Path, exclude_misc: bool) -> Result<Self> {
        Ok(Self::new(Box::new(File::create(path)?), exclude_misc))
    }

    pub fn record(&mut self, line: impl Display) -> Result<()> {
        self.records += 1;
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    pub fn misc(&mut self, line: impl Display) -> Result<()> {
        if self.exclude_misc {
            return Ok(());
        }
        self.misc += 1;
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    /// Record lines written so far.
    #[must_use]
    pub const fn records_written(&self) -> u64 {
        self.records
    }

    /// Misc lines written so far (suppressed ones excluded).
    #[must_use]
    pub const fn misc_written(&self) -> u64 {
        self.misc
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for ReportSink {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

/// Machine-readable outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub operation: Operation,
    pub files_read: u64,
    pub files_failed: u64,
    pub entries_processed: u64,
    pub records_emitted: u64,
    pub decode_failures: u64,
    pub checksum_mismatches: u64,
    pub cross_validation_failures: u64,
    pub anomalies: Vec<Anomaly>,
    pub scan: Option<ScanSummary>,
}

impl OperationSummary {
    #[must_use]
    pub const fn new(operation: Operation) -> Self {
        Self {
            operation,
            files_read: 0,
            files_failed: 0,
            entries_processed: 0,
            records_emitted: 0,
            decode_failures: 0,
            checksum_mismatches: 0,
            cross_validation_failures: 0,
            anomalies: Vec::new(),
            scan: None,
        }
    }
}

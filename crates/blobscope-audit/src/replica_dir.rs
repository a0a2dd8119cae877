//! Enumerating a replica's snapshot files in fold order.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use blobscope_error::Result;
use tracing::{debug, warn};

use crate::config::SnapshotOrder;

const TARGET: &str = "blobscope.audit::replica_dir";

/// Replica name used in status maps: the directory's final component.
#[must_use]
pub fn replica_name(dir: &Path) -> String {
    dir.file_name().map_or_else(
        || "unknown".to_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Leading decimal number of a file name, e.g. `4096` for `4096_index`.
#[must_use]
pub fn log_offset_prefix(file_name: &str) -> Option<u64> {
    let digits = file_name.len() - file_name.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    file_name[..digits].parse().ok()
}

/// Regular files of `dir`, ordered per `order`.
pub fn list_snapshots(dir: &Path, order: SnapshotOrder) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        } else {
            debug!(target: TARGET, path = %entry.path().display(), "skipping non-regular entry");
        }
    }

    if order == SnapshotOrder::LogOffset {
        let name = |path: &Path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        for path in &files {
            if log_offset_prefix(&name(path)).is_none() {
                warn!(
                    target: TARGET,
                    path = %path.display(),
                    "snapshot name has no log offset prefix, ordering it last"
                );
            }
        }
        files.sort_by(|a, b| {
            let (name_a, name_b) = (name(a), name(b));
            match (log_offset_prefix(&name_a), log_offset_prefix(&name_b)) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| name_a.cmp(&name_b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => name_a.cmp(&name_b),
            }
        });
    }
    debug!(target: TARGET, dir = %dir.display(), files = files.len(), ?order, "listed snapshots");
    Ok(files)
}

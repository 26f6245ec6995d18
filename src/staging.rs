//! Staging copies of the active log
//!
//! Before a range of the active log is uploaded it is copied into a temporary
//! file next to the source. The upload then reads from the copy, so the source
//! handle is closed before any network I/O starts and a slow remote cannot
//! observe the producer's later writes.
//!
//! A [`StagedRange`] owns its temporary file and removes it when dropped, on
//! success and on every error path alike.
//!
//! Staging names start with a dot (`.gc.log.XXXXXX.stage`), which keeps them
//! out of the `gc.log.*` rotation pattern the sweeper uses.

use crate::error::{RelayError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, trace, warn};

/// Suffix of every staging file
pub const STAGING_SUFFIX: &str = ".stage";

/// A byte range of the active log copied into a temporary file
#[derive(Debug)]
pub struct StagedRange {
    file: NamedTempFile,
    offset: u64,
    len: u64,
}

impl StagedRange {
    /// Path of the staging file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Offset in the source the copy starts at
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes actually copied
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing was copied
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Copy `[offset, offset + len)` of `source` into a staging file next to `source_path`.
///
/// Fewer than `len` bytes are copied when the source shrank after it was
/// stat'ed; [`StagedRange::len`] reports what was actually copied.
///
/// # Errors
///
/// - [`RelayError::Staging`] if the staging file cannot be created or written,
///   or the source cannot be read
pub fn stage_range(
    source: &mut File,
    source_path: &Path,
    offset: u64,
    len: u64,
) -> Result<StagedRange> {
    let staging_err = |err: io::Error| RelayError::Staging {
        path: source_path.to_path_buf(),
        source: err,
    };

    let dir = staging_dir(source_path);
    let mut file = Builder::new()
        .prefix(&staging_prefix(source_path))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(&dir)
        .map_err(staging_err)?;

    source.seek(SeekFrom::Start(offset)).map_err(staging_err)?;
    let copied = io::copy(&mut Read::by_ref(source).take(len), file.as_file_mut()).map_err(staging_err)?;
    file.as_file_mut().flush().map_err(staging_err)?;

    trace!(
        "Staged {} bytes at offset {} of {} into {}",
        copied,
        offset,
        source_path.display(),
        file.path().display()
    );

    Ok(StagedRange {
        file,
        offset,
        len: copied,
    })
}

/// Remove staging files left behind by a previous process.
///
/// Scoped cleanup cannot run when the process is killed mid-upload; this
/// catches those leftovers. Returns the number of files removed.
pub fn remove_stale(dir: &Path, file_name: &str) -> Result<usize> {
    let prefix = format!(".{}.", file_name);
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with(&prefix) && name.ends_with(STAGING_SUFFIX)) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Removed stale staging file {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stale staging file {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}

fn staging_dir(source_path: &Path) -> PathBuf {
    match source_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn staging_prefix(source_path: &Path) -> String {
    let name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "active".to_string());
    format!(".{}.", name)
}

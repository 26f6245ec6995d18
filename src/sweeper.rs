//! Rotated-file sweeper
//!
//! The producer rotates `gc.log` into siblings such as `gc.log.0` or
//! `gc.log.2024-03-07`. Those files are complete and never written again, so
//! each is shipped once in full and then removed locally. Nothing is
//! remembered between sweeps: a file that failed to upload is still there next
//! time and is simply tried again.

use crate::error::Result;
use crate::remote::{ObjectStore, TargetResolver, Upload};
use crate::types::SweepReport;
use globset::{GlobBuilder, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

/// Ships and removes rotated siblings of the active log
#[derive(Debug, Clone)]
pub struct RotatedSweeper {
    dir: PathBuf,
    file_name: String,
    matcher: GlobMatcher,
}

/// What happened to one rotated file
enum FileResult {
    Deleted(u64),
    Kept(u64),
    Failed,
}

impl RotatedSweeper {
    /// Create a sweeper for siblings of `file_name` in `dir`
    ///
    /// # Errors
    ///
    /// Returns [`crate::RelayError::InvalidPattern`] if the rotation pattern
    /// built from `file_name` does not compile.
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Result<Self> {
        let file_name = file_name.into();
        let pattern = format!("{}.*", globset::escape(&file_name));
        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        Ok(Self {
            dir: dir.into(),
            file_name,
            matcher,
        })
    }

    /// Whether `name` looks like a rotated sibling
    pub fn is_rotated_name(&self, name: &str) -> bool {
        name != self.file_name && self.matcher.is_match(name)
    }

    /// Rotated siblings currently in the directory, sorted by name
    ///
    /// Entries that cannot be read are logged and left out; only failing to
    /// open the directory itself is an error.
    pub fn rotated_files(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.is_rotated_name(name) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => found.push(entry.path()),
                Ok(_) => debug!("Skipping non-file {}", entry.path().display()),
                Err(e) => warn!("Failed to inspect {}: {}", entry.path().display(), e),
            }
        }
        found.sort();
        Ok(found)
    }

    /// Ship every rotated sibling once and delete the ones that made it.
    ///
    /// Failures are logged per file and never stop the sweep.
    pub fn sweep(&self, resolver: &dyn TargetResolver, store: &dyn ObjectStore) -> SweepReport {
        let mut report = SweepReport::default();

        let files = match self.rotated_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list rotated logs in {}: {}", self.dir.display(), e);
                return report;
            }
        };
        report.found = files.len();

        for path in &files {
            let span = info_span!("gclog_rotated", path = %path.display());
            let _guard = span.enter();

            match self.ship(path, resolver, store) {
                FileResult::Deleted(bytes) => {
                    report.uploaded += 1;
                    report.deleted += 1;
                    report.bytes += bytes;
                }
                FileResult::Kept(bytes) => {
                    report.uploaded += 1;
                    report.failed += 1;
                    report.bytes += bytes;
                }
                FileResult::Failed => report.failed += 1,
            }
        }

        if report.found > 0 {
            info!(
                "Swept {} rotated logs: {} uploaded, {} deleted, {} failed",
                report.found, report.uploaded, report.deleted, report.failed
            );
        }
        report
    }

    fn ship(&self, path: &Path, resolver: &dyn TargetResolver, store: &dyn ObjectStore) -> FileResult {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return FileResult::Failed;
        };

        let len = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!("Failed to stat rotated log: {}", e);
                return FileResult::Failed;
            }
        };

        let target = match resolver.resolve(name) {
            Ok(target) => target,
            Err(e) => {
                warn!("Failed to resolve target: {}", e);
                return FileResult::Failed;
            }
        };

        if let Err(e) = store.put(&target, &Upload::whole(path, len)) {
            warn!("Failed to upload rotated log to {}: {}", target, e);
            return FileResult::Failed;
        }
        debug!("Uploaded {} bytes to {}", len, target);

        match fs::remove_file(path) {
            Ok(()) => FileResult::Deleted(len),
            Err(e) => {
                warn!("Uploaded but failed to delete rotated log: {}", e);
                FileResult::Kept(len)
            }
        }
    }
}

//! File identity lookup
//!
//! The tracker needs to know whether the file it sees now is the same file it
//! saw last cycle. On Unix that is the inode number, which survives appends
//! and truncation but changes when the producer renames the old log away and
//! creates a fresh one.
//!
//! Not every platform or filesystem exposes a stable identity. Instead of
//! scattering `cfg` checks through the tracker, a [`FileIdentity`]
//! implementation is chosen once with [`detect`]:
//!
//! - [`InodeIdentity`] returns the inode number.
//! - [`SentinelIdentity`] always returns [`FileToken::UNKNOWN`]. A tracker fed
//!   only unknown tokens never establishes a lineage, so every cycle re-ships
//!   the whole file. That is wasteful but never loses or corrupts data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, Metadata};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque file identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileToken(u64);

impl FileToken {
    /// Sentinel meaning "no identity available / never observed"
    pub const UNKNOWN: FileToken = FileToken(0);

    /// Wrap a raw identity value
    pub fn new(raw: u64) -> Self {
        FileToken(raw)
    }

    /// Raw identity value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether this token carries a real identity
    pub fn is_known(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FileToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps file metadata to an identity token
pub trait FileIdentity: Send + Sync + fmt::Debug {
    /// Identity of the file described by `metadata`
    fn identify(&self, metadata: &Metadata) -> FileToken;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Inode-based identity for platforms that expose one
#[derive(Debug, Clone, Copy, Default)]
pub struct InodeIdentity;

impl InodeIdentity {
    /// Whether this platform can report inode numbers at all
    pub fn is_supported() -> bool {
        cfg!(unix)
    }
}

impl FileIdentity for InodeIdentity {
    #[cfg(unix)]
    fn identify(&self, metadata: &Metadata) -> FileToken {
        use std::os::unix::fs::MetadataExt;
        FileToken(metadata.ino())
    }

    #[cfg(not(unix))]
    fn identify(&self, _metadata: &Metadata) -> FileToken {
        FileToken::UNKNOWN
    }

    fn name(&self) -> &'static str {
        "inode"
    }
}

/// Degraded identity: every file looks new
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelIdentity;

impl FileIdentity for SentinelIdentity {
    fn identify(&self, _metadata: &Metadata) -> FileToken {
        FileToken::UNKNOWN
    }

    fn name(&self) -> &'static str {
        "sentinel"
    }
}

/// Pick an identity implementation by probing `probe`.
///
/// When the probe can be stat'ed, the inode implementation is kept only if it
/// actually yields a known token there (some network filesystems report 0).
/// When the probe is missing, the choice falls back to what the platform
/// supports; the log directory may simply not exist yet.
pub fn detect(probe: &Path) -> Arc<dyn FileIdentity> {
    if !InodeIdentity::is_supported() {
        warn!("Stable file identity unavailable on this platform; the active log will be re-uploaded in full every cycle");
        return Arc::new(SentinelIdentity);
    }

    match fs::metadata(probe) {
        Ok(metadata) if InodeIdentity.identify(&metadata).is_known() => {
            debug!("Using inode file identity (probed {})", probe.display());
            Arc::new(InodeIdentity)
        }
        Ok(_) => {
            warn!(
                "Filesystem at {} reports no inode numbers; the active log will be re-uploaded in full every cycle",
                probe.display()
            );
            Arc::new(SentinelIdentity)
        }
        Err(e) => {
            debug!("Identity probe {} failed ({}), assuming inode support", probe.display(), e);
            Arc::new(InodeIdentity)
        }
    }
}

//! Content fingerprints for the active log
//!
//! A fingerprint is the first few bytes of a file. It is not a digest: it only
//! answers "does this file still start the way it did last time?", which is
//! enough to notice a copy-truncate that regrew past the previously shipped
//! offset while keeping the same inode.
//!
//! Observations always capture the full window. A lineage keeps the
//! fingerprint it was born with, and later observations are compared by
//! prefix ([`Fingerprint::continues`]), so a file that was shorter than the
//! window when first seen does not look replaced once it grows past it.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Default number of leading bytes kept as a fingerprint
pub const DEFAULT_FINGERPRINT_SIZE: usize = 64;

/// Largest fingerprint window a configuration may ask for
pub const MAX_FINGERPRINT_SIZE: usize = 4096;

/// Leading bytes of a file, captured at observation time
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint {
    bytes: Vec<u8>,
}

impl Fingerprint {
    /// Read up to `max_len` bytes from offset 0 of `file`.
    ///
    /// The file cursor is left wherever the read stopped; callers that read
    /// content afterwards must seek explicitly.
    pub fn read(file: &mut File, max_len: usize) -> io::Result<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut bytes = Vec::with_capacity(max_len.min(MAX_FINGERPRINT_SIZE));
        file.by_ref().take(max_len as u64).read_to_end(&mut bytes)?;

        Ok(Self { bytes })
    }

    /// Build a fingerprint from raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// Raw fingerprint bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes in the fingerprint
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no bytes were captured
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether `self` starts with exactly the bytes of `previous`.
    ///
    /// An empty `previous` never matches: there is no lineage to continue.
    pub fn continues(&self, previous: &Fingerprint) -> bool {
        !previous.is_empty() && self.bytes.starts_with(&previous.bytes)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}B:{})", self.bytes.len(), self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First eight bytes only
        let shown = &self.bytes[..self.bytes.len().min(8)];
        write!(f, "{}", hex::encode(shown))
    }
}

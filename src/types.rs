//! Core data types used throughout the diagrelay library
//!
//! This module contains the data structures shared between the tracker, the
//! sweeper and the poll entry point.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Tracker state**: [`TrackerState`], [`Observation`] - what was shipped and what is on disk now
//! - **Decisions**: [`Action`], [`Delivery`], [`Cause`], [`SkipReason`], [`TargetPlan`] - output of classification
//! - **Configuration**: [`DeliveryPolicy`] - how growth of the active log is shipped
//! - **Results**: [`SweepReport`], [`ActiveOutcome`], [`PollReport`] - what a cycle did
//!
//! ## Examples
//!
//! ```rust
//! use diagrelay::types::{DeliveryPolicy, TrackerState};
//!
//! let state = TrackerState::default();
//! assert!(state.is_empty());
//!
//! let policy = DeliveryPolicy::overwrite_default();
//! assert!(!policy.is_append());
//! ```

use crate::fingerprint::Fingerprint;
use crate::identity::FileToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Minimum growth before the overwrite policy re-ships the active log
pub const DEFAULT_MIN_GROWTH_BYTES: u64 = 10 * 1024;

/// Maximum age of the last upload before the overwrite policy re-ships anyway
pub const DEFAULT_MAX_UPLOAD_AGE: Duration = Duration::from_secs(10 * 60);

/// Cross-cycle state of the active-file tracker
///
/// Lives only for the lifetime of the process. It is replaced wholesale after
/// a confirmed delivery and left untouched otherwise, so a failed cycle is
/// simply re-evaluated from the same baseline next time.
///
/// # Examples
///
/// ```rust
/// # use diagrelay::types::TrackerState;
/// let state = TrackerState::default();
/// assert_eq!(state.bytes_sent, 0);
/// assert!(state.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
    /// Identity of the file the current lineage belongs to
    pub inode: FileToken,
    /// Leading bytes of the lineage, fixed width for its whole life
    pub fingerprint: Fingerprint,
    /// Bytes from the start of the file already delivered in this lineage
    pub bytes_sent: u64,
    /// Remote target reused by the overwrite policy
    pub remote_target: Option<String>,
    /// When the last delivery was confirmed
    pub last_delivery: Option<DateTime<Utc>>,
}

impl TrackerState {
    /// Whether no file has been observed yet
    ///
    /// A state populated through the sentinel identity also counts as empty,
    /// which is what makes that identity re-ship the whole file every cycle.
    pub fn is_empty(&self) -> bool {
        !self.inode.is_known()
    }
}

/// What the observation step saw on disk this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Current size of the active log
    pub size: u64,
    /// Current identity of the active log
    pub identity: FileToken,
    /// Leading bytes, read with the full configured window
    pub fingerprint: Fingerprint,
}

/// How growth of the active log is shipped
///
/// The two policies imply different contracts from the remote store, so the
/// store behind the agent decides which one to configure:
///
/// - `Append` ships only the new tail on every growth tick. Every delivery
///   resolves a fresh target; a store that keeps one object per name must
///   treat successive partial writes as appends (or use time-bucketed names).
/// - `Overwrite` re-ships the whole file to the same remembered target once
///   enough growth or time has accumulated, and moves to a new target on
///   rotation, deleting the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Incremental tail delivery
    #[default]
    Append,
    /// Whole-file overwrite with growth/age thresholds
    Overwrite {
        /// Growth below this many bytes is held back...
        min_growth_bytes: u64,
        /// ...unless the last upload is older than this
        #[serde(with = "crate::config::duration_text")]
        max_upload_age: Duration,
    },
}

impl DeliveryPolicy {
    /// Overwrite policy with the stock 10 KiB / 10 minute thresholds
    pub fn overwrite_default() -> Self {
        DeliveryPolicy::Overwrite {
            min_growth_bytes: DEFAULT_MIN_GROWTH_BYTES,
            max_upload_age: DEFAULT_MAX_UPLOAD_AGE,
        }
    }

    /// Whether this is the incremental policy
    pub fn is_append(&self) -> bool {
        matches!(self, DeliveryPolicy::Append)
    }
}

/// Why the tracker decided to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// First observation of any file
    First,
    /// A different file now sits at the active path (rename rotation)
    IdentityChanged,
    /// Same file, but shorter than what was already shipped
    Truncated,
    /// Same file, but its leading bytes changed (copy-truncate + regrow)
    ContentReplaced,
    /// Same lineage, more bytes
    Growth,
}

impl Cause {
    /// Whether this cause breaks the lineage
    pub fn is_rotation(&self) -> bool {
        matches!(
            self,
            Cause::IdentityChanged | Cause::Truncated | Cause::ContentReplaced
        )
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Cause::First => "first observation",
            Cause::IdentityChanged => "rotation",
            Cause::Truncated => "truncation",
            Cause::ContentReplaced => "copy-truncate",
            Cause::Growth => "growth",
        };
        f.write_str(text)
    }
}

/// Why the tracker decided not to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Nothing new since the last delivery
    Quiescent,
    /// Overwrite policy: growth and age both below their thresholds
    BelowThreshold {
        /// Bytes grown since the last delivery
        growth: u64,
        /// Time since the last delivery
        age: Duration,
    },
    /// The staged range came back empty (file shrank between stat and read)
    EmptyRange,
}

/// Which remote target a delivery goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPlan {
    /// Ask the resolver for a new target
    Fresh,
    /// Overwrite the remembered target
    Reuse(String),
    /// Resolve a new target, then delete `previous` once delivery succeeded
    Replace {
        /// Target of the broken lineage
        previous: String,
    },
}

/// A byte range of the active log to ship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// First byte to ship
    pub offset: u64,
    /// One past the last byte to ship (the observed size)
    pub end: u64,
    /// Why this range is shipped
    pub cause: Cause,
    /// Where it is shipped to
    pub target: TargetPlan,
}

impl Delivery {
    /// Number of bytes in the range
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.offset)
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decision of one classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Leave everything as is
    Skip(SkipReason),
    /// Ship a range
    Deliver(Delivery),
}

/// Result of [`crate::classify::transition`]
///
/// `next` is the state to commit if the action is carried out successfully.
/// For [`Action::Skip`] it equals the prior state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// What to do
    pub action: Action,
    /// State after doing it
    pub next: TrackerState,
}

/// Summary of one sweep over rotated files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Rotated files found
    pub found: usize,
    /// Rotated files uploaded
    pub uploaded: usize,
    /// Uploaded files removed locally
    pub deleted: usize,
    /// Files that failed at any step
    pub failed: usize,
    /// Bytes uploaded
    pub bytes: u64,
}

/// Step of the active-file cycle that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Opening, stat'ing or fingerprinting the file
    Observe,
    /// Resolving the remote target
    Resolve,
    /// Copying the range into a staging file
    Stage,
    /// Uploading the staged range
    Deliver,
}

/// What the active-file tracker did in one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActiveOutcome {
    /// The active log does not exist
    Missing,
    /// The active log is empty
    Empty,
    /// Nothing was shipped
    Skipped {
        /// Why
        #[serde(flatten)]
        reason: SkipReason,
    },
    /// A range was shipped and committed
    Delivered {
        /// Why
        cause: Cause,
        /// First byte shipped
        offset: u64,
        /// Bytes shipped
        bytes: u64,
        /// Remote target used
        target: String,
    },
    /// A step failed; state is unchanged
    Failed {
        /// Which step
        stage: FailureStage,
        /// Error message
        error: String,
    },
}

impl ActiveOutcome {
    /// Bytes shipped by this outcome
    pub fn bytes(&self) -> u64 {
        match self {
            ActiveOutcome::Delivered { bytes, .. } => *bytes,
            _ => 0,
        }
    }

    /// Whether the cycle failed
    pub fn is_failure(&self) -> bool {
        matches!(self, ActiveOutcome::Failed { .. })
    }
}

/// Result of one full poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollReport {
    /// When the cycle started
    pub started_at: DateTime<Utc>,
    /// Whether the log directory existed
    pub directory_present: bool,
    /// Rotated-file sweep results
    pub sweep: SweepReport,
    /// Active-file result, absent when the directory was missing
    pub active: Option<ActiveOutcome>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl PollReport {
    /// Total bytes shipped by the cycle
    pub fn bytes_shipped(&self) -> u64 {
        self.sweep.bytes + self.active.as_ref().map_or(0, ActiveOutcome::bytes)
    }

    /// Whether any step of the cycle failed
    pub fn has_failures(&self) -> bool {
        self.sweep.failed > 0 || self.active.as_ref().is_some_and(ActiveOutcome::is_failure)
    }
}

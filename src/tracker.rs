//! Active-file tracker
//!
//! Ships the one log file that is still being written. Each call to
//! [`ActiveFileTracker::poll`] runs one cycle:
//!
//! 1. **Observe**: open the file once, stat it, read its identity and the
//!    leading fingerprint window. A missing or empty file ends the cycle.
//! 2. **Classify**: hand the observation and the committed state to
//!    [`crate::classify::transition`].
//! 3. **Deliver**: resolve the remote target for the canonical file name,
//!    copy the chosen range into a staging file, close the source, upload.
//! 4. **Commit**: only after the upload succeeded, replace the committed
//!    state.
//!
//! Any failure ends the cycle with [`ActiveOutcome::Failed`] and leaves the
//! committed state untouched, so the same bytes are offered again next cycle.
//! Delivery is therefore at-least-once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use diagrelay::identity::InodeIdentity;
//! use diagrelay::remote::{MemoryStore, StaticResolver};
//! use diagrelay::tracker::ActiveFileTracker;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tracker = ActiveFileTracker::new("/var/log/diag/gc/gc.log", Arc::new(InodeIdentity))?;
//! let store = MemoryStore::new();
//! let outcome = tracker.poll(&StaticResolver::new("mem://pod"), &store);
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::classify::transition;
use crate::error::{RelayError, Result};
use crate::fingerprint::{Fingerprint, DEFAULT_FINGERPRINT_SIZE, MAX_FINGERPRINT_SIZE};
use crate::identity::FileIdentity;
use crate::remote::{ObjectStore, TargetResolver, Upload};
use crate::staging::stage_range;
use crate::types::{
    Action, ActiveOutcome, Cause, Delivery, DeliveryPolicy, FailureStage, Observation, SkipReason,
    TargetPlan, TrackerState, Transition,
};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// Cross-cycle tracker for a single active log file
#[derive(Debug)]
pub struct ActiveFileTracker {
    path: PathBuf,
    file_name: String,
    fingerprint_size: usize,
    policy: DeliveryPolicy,
    identity: Arc<dyn FileIdentity>,
    state: TrackerState,
}

impl ActiveFileTracker {
    /// Create a tracker for the file at `path`
    ///
    /// The remote target is always resolved for the file name of `path`,
    /// never for a staging name.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfiguration`] if `path` has no UTF-8
    /// file name.
    pub fn new(path: impl Into<PathBuf>, identity: Arc<dyn FileIdentity>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| RelayError::config(format!("{} has no usable file name", path.display())))?;

        Ok(Self {
            path,
            file_name,
            fingerprint_size: DEFAULT_FINGERPRINT_SIZE,
            policy: DeliveryPolicy::default(),
            identity,
            state: TrackerState::default(),
        })
    }

    /// Set the delivery policy
    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the fingerprint window, clamped to `1..=MAX_FINGERPRINT_SIZE`
    pub fn with_fingerprint_size(mut self, size: usize) -> Self {
        self.fingerprint_size = size.clamp(1, MAX_FINGERPRINT_SIZE);
        self
    }

    /// Path of the tracked file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// State committed by the last successful delivery
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Delivery policy in use
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Run one cycle
    pub fn poll(&mut self, resolver: &dyn TargetResolver, store: &dyn ObjectStore) -> ActiveOutcome {
        self.poll_at(resolver, store, Utc::now())
    }

    /// Run one cycle as of `now`
    pub fn poll_at(
        &mut self,
        resolver: &dyn TargetResolver,
        store: &dyn ObjectStore,
        now: DateTime<Utc>,
    ) -> ActiveOutcome {
        let span = info_span!("gclog_active", path = %self.path.display());
        let _guard = span.enter();

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Active log does not exist, skipping");
                return ActiveOutcome::Missing;
            }
            Err(e) => return failed(FailureStage::Observe, "Failed to open active log", e.into()),
        };

        let observation = match self.observe(&mut file) {
            Ok(Some(observation)) => observation,
            Ok(None) => return ActiveOutcome::Empty,
            Err(e) => return failed(FailureStage::Observe, "Failed to observe active log", e),
        };

        let Transition { action, next } = transition(&self.state, &observation, &self.policy, now);
        let delivery = match action {
            Action::Skip(reason) => {
                log_skip(&reason, observation.size);
                return ActiveOutcome::Skipped { reason };
            }
            Action::Deliver(delivery) => delivery,
        };
        self.log_cause(&delivery, &observation);

        let target = match &delivery.target {
            TargetPlan::Reuse(existing) => existing.clone(),
            TargetPlan::Fresh | TargetPlan::Replace { .. } => match resolver.resolve(&self.file_name) {
                Ok(target) => target,
                Err(e) => return failed(FailureStage::Resolve, "Failed to resolve target for active log", e),
            },
        };

        let staged = match stage_range(&mut file, &self.path, delivery.offset, delivery.len()) {
            Ok(staged) => staged,
            Err(e) => return failed(FailureStage::Stage, "Failed to stage active log", e),
        };
        drop(file);

        if staged.is_empty() {
            debug!("Staged range at offset {} came back empty, skipping", delivery.offset);
            return ActiveOutcome::Skipped {
                reason: SkipReason::EmptyRange,
            };
        }

        let upload = Upload {
            path: staged.path(),
            offset: delivery.offset,
            len: staged.len(),
        };
        if let Err(e) = store.put(&target, &upload) {
            return failed(FailureStage::Deliver, "Failed to upload active log", e);
        }
        let delivered = staged.len();
        drop(staged);

        self.state = TrackerState {
            bytes_sent: delivery.offset + delivered,
            remote_target: Some(target.clone()),
            ..next
        };
        info!(
            "Uploaded active log: {} bytes at offset {} ({}), {} sent in total",
            delivered, delivery.offset, delivery.cause, self.state.bytes_sent
        );

        if let TargetPlan::Replace { previous } = &delivery.target {
            if *previous != target {
                match store.delete(previous) {
                    Ok(()) => debug!("Deleted previous active log at {}", previous),
                    Err(e) => warn!("Failed to delete previous active log at {}: {}", previous, e),
                }
            }
        }

        ActiveOutcome::Delivered {
            cause: delivery.cause,
            offset: delivery.offset,
            bytes: delivered,
            target,
        }
    }

    /// Stat and fingerprint an open file; `None` when it is empty
    fn observe(&self, file: &mut File) -> Result<Option<Observation>> {
        let metadata = file.metadata()?;
        let size = metadata.len();
        if size == 0 {
            debug!("Active log is empty, skipping");
            return Ok(None);
        }

        let identity = self.identity.identify(&metadata);
        let fingerprint = Fingerprint::read(file, self.fingerprint_size)?;

        Ok(Some(Observation {
            size,
            identity,
            fingerprint,
        }))
    }

    fn log_cause(&self, delivery: &Delivery, observation: &Observation) {
        match delivery.cause {
            Cause::First => info!("First observation of active log ({} bytes)", observation.size),
            Cause::IdentityChanged => info!(
                "Active log identity changed ({} -> {}), rotation detected",
                self.state.inode, observation.identity
            ),
            Cause::Truncated => info!(
                "Active log was truncated (size={}, sent={})",
                observation.size, self.state.bytes_sent
            ),
            Cause::ContentReplaced => info!(
                "Active log fingerprint changed ({} -> {}), copy-truncate and regrow detected",
                self.state.fingerprint, observation.fingerprint
            ),
            Cause::Growth => debug!(
                "Active log grew from {} to {} bytes",
                self.state.bytes_sent, observation.size
            ),
        }
    }
}

fn log_skip(reason: &SkipReason, size: u64) {
    match reason {
        SkipReason::Quiescent => debug!("No new data in active log (size={})", size),
        SkipReason::BelowThreshold { growth, age } => debug!(
            "Active log grew by {} bytes ({} since last upload), below thresholds",
            growth,
            humantime::format_duration(std::time::Duration::from_secs(age.as_secs()))
        ),
        SkipReason::EmptyRange => debug!("Nothing to ship"),
    }
}

fn failed(stage: FailureStage, context: &str, error: RelayError) -> ActiveOutcome {
    if error.is_transient() {
        warn!("{}: {}", context, error);
    } else {
        error!("{}: {}", context, error);
    }
    ActiveOutcome::Failed {
        stage,
        error: error.to_string(),
    }
}

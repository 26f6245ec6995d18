//! The poll entry point
//!
//! [`GcLogRelay`] owns one [`RotatedSweeper`] and one [`ActiveFileTracker`]
//! for a log directory and runs them in that order on every cycle. A missing
//! directory is a valid state (the JVM may not have started logging yet) and
//! turns the cycle into a no-op.
//!
//! Cycles run strictly one after another on the caller's thread, either one
//! at a time through [`GcLogRelay::poll_once`] or on a fixed interval through
//! [`GcLogRelay::run`].

use crate::config::RelayConfig;
use crate::error::Result;
use crate::identity::{self, FileIdentity};
use crate::remote::{DiagnosticUrlResolver, HttpObjectStore, ObjectStore, TargetResolver};
use crate::staging;
use crate::sweeper::RotatedSweeper;
use crate::tracker::ActiveFileTracker;
use crate::types::PollReport;
use crate::utils::format_bytes;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Longest uninterrupted sleep between cycles, so a stop request is noticed
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Ships the GC logs of one directory
pub struct GcLogRelay {
    config: RelayConfig,
    sweeper: RotatedSweeper,
    tracker: ActiveFileTracker,
    resolver: Arc<dyn TargetResolver>,
    store: Arc<dyn ObjectStore>,
    stale_staging_checked: bool,
}

impl fmt::Debug for GcLogRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcLogRelay")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl GcLogRelay {
    /// Build a relay with the default HTTP collaborators
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        RelayBuilder::new(config).build()
    }

    /// Effective configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The active-file tracker
    pub fn tracker(&self) -> &ActiveFileTracker {
        &self.tracker
    }

    /// Run one cycle: sweep rotated files, then ship the active log
    #[instrument(skip(self), fields(dir = %self.config.log_dir.display()))]
    pub fn poll_once(&mut self) -> PollReport {
        let started = Instant::now();
        let started_at = Utc::now();

        if !self.config.log_dir.is_dir() {
            debug!("Log directory does not exist, skipping");
            return PollReport {
                started_at,
                directory_present: false,
                sweep: Default::default(),
                active: None,
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        if !self.stale_staging_checked {
            match staging::remove_stale(&self.config.log_dir, &self.config.file_name) {
                Ok(0) => {}
                Ok(n) => info!("Removed {} stale staging files", n),
                Err(e) => warn!("Failed to look for stale staging files: {}", e),
            }
            self.stale_staging_checked = true;
        }

        let sweep = self.sweeper.sweep(self.resolver.as_ref(), self.store.as_ref());
        let active = self.tracker.poll(self.resolver.as_ref(), self.store.as_ref());

        let report = PollReport {
            started_at,
            directory_present: true,
            sweep,
            active: Some(active),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if report.bytes_shipped() > 0 {
            info!(
                "Cycle shipped {} in {}ms",
                format_bytes(report.bytes_shipped()),
                report.duration_ms
            );
        }
        report
    }

    /// Run cycles every `scan_interval` until `stop` is raised or
    /// `max_cycles` cycles have run. Returns the number of cycles run.
    pub fn run(&mut self, stop: &AtomicBool, max_cycles: Option<u64>) -> u64 {
        self.run_with(stop, max_cycles, |_| {})
    }

    /// Like [`GcLogRelay::run`], handing every report to `on_report`
    pub fn run_with<F>(&mut self, stop: &AtomicBool, max_cycles: Option<u64>, mut on_report: F) -> u64
    where
        F: FnMut(&PollReport),
    {
        let interval = self.config.scan_interval;
        info!(
            "Shipping {} every {}",
            self.config.active_path().display(),
            humantime::format_duration(interval)
        );

        let mut cycles = 0;
        while !stop.load(Ordering::SeqCst) {
            let deadline = Instant::now() + interval;
            let report = self.poll_once();
            on_report(&report);
            cycles += 1;

            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            sleep_until(deadline, stop);
        }

        debug!("Scheduler stopped after {} cycles", cycles);
        cycles
    }
}

fn sleep_until(deadline: Instant, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_CHECK_INTERVAL));
    }
}

/// Builder for [`GcLogRelay`]
///
/// Collaborators not supplied explicitly are derived from the configuration:
/// a [`DiagnosticUrlResolver`], an [`HttpObjectStore`] with the configured
/// request timeout, and an identity picked by probing the log directory.
///
/// # Examples
///
/// ```rust
/// use diagrelay::{RelayBuilder, RelayConfig};
/// use diagrelay::remote::{MemoryStore, StaticResolver};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RelayConfig {
///     log_dir: std::env::temp_dir().join("diagrelay-doc"),
///     ..RelayConfig::default()
/// };
/// let relay = RelayBuilder::new(config)
///     .resolver(Arc::new(StaticResolver::new("mem://pod")))
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
/// assert_eq!(relay.config().file_name, "gc.log");
/// # Ok(())
/// # }
/// ```
pub struct RelayBuilder {
    config: RelayConfig,
    resolver: Option<Arc<dyn TargetResolver>>,
    store: Option<Arc<dyn ObjectStore>>,
    identity: Option<Arc<dyn FileIdentity>>,
}

impl RelayBuilder {
    /// Start from `config`
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            resolver: None,
            store: None,
            identity: None,
        }
    }

    /// Use `resolver` instead of the diagnostic-service resolver
    pub fn resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use `store` instead of the HTTP store
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `identity` instead of probing
    pub fn identity(mut self, identity: Arc<dyn FileIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Build the relay
    ///
    /// # Errors
    ///
    /// - [`crate::RelayError::InvalidConfiguration`] if the configuration is
    ///   unusable (the remote settings are only checked when no resolver was
    ///   supplied)
    /// - [`crate::RelayError::InvalidPattern`] if the rotation pattern does
    ///   not compile
    pub fn build(self) -> Result<GcLogRelay> {
        let config = self.config;
        if self.resolver.is_some() {
            config.validate_local()?;
        } else {
            config.validate()?;
        }

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(DiagnosticUrlResolver::new(config.remote.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(HttpObjectStore::new(config.request_timeout)));
        let identity = self
            .identity
            .unwrap_or_else(|| identity::detect(&config.log_dir));

        let sweeper = RotatedSweeper::new(&config.log_dir, config.file_name.clone())?;
        let tracker = ActiveFileTracker::new(config.active_path(), identity)?
            .with_policy(config.policy.clone())
            .with_fingerprint_size(config.fingerprint_size);

        debug!("Built relay for {}", config.active_path().display());
        Ok(GcLogRelay {
            config,
            sweeper,
            tracker,
            resolver,
            store,
            stale_staging_checked: false,
        })
    }
}

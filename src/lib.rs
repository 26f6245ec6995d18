//! # diagrelay - GC log shipping for JVM sidecars
//!
//! A small agent that relays a JVM garbage-collection log from a container
//! filesystem to a remote diagnostic store over HTTP, without re-sending
//! bytes that were already delivered and without losing bytes when the log
//! rotates.
//!
//! ## Overview
//!
//! Every poll cycle runs two components in order:
//!
//! - **Rotated-file sweeper** ([`sweeper`]): uploads each `gc.log.*` sibling
//!   once in full and deletes it locally after the upload succeeded.
//! - **Active-file tracker** ([`tracker`]): remembers the identity, the
//!   leading bytes and the number of bytes already sent for `gc.log`, and on
//!   each cycle ships exactly the new tail, or the whole file when the
//!   producer rotated, truncated or rewrote it.
//!
//! ## How Rotation Is Detected
//!
//! | Producer behaviour                    | Seen as                     |
//! |---------------------------------------|-----------------------------|
//! | rename `gc.log` away, create new file | identity (inode) changed    |
//! | truncate in place                     | size below bytes sent       |
//! | copy-truncate, then regrow past size  | leading bytes changed       |
//!
//! The decision itself is a pure function ([`classify::transition`]) that is
//! tested without touching the filesystem.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diagrelay::{GcLogRelay, RelayConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // NC_DIAGNOSTIC_LOG_FOLDER, NC_DIAGNOSTIC_AGENT_SERVICE, CLOUD_NAMESPACE, ...
//! let config = RelayConfig::from_env()?;
//! let mut relay = GcLogRelay::from_config(config)?;
//!
//! let report = relay.poll_once();
//! println!("shipped {} bytes", report.bytes_shipped());
//! # Ok(())
//! # }
//! ```
//!
//! ## Embedding With Custom Collaborators
//!
//! ```rust
//! use diagrelay::{RelayBuilder, RelayConfig};
//! use diagrelay::remote::{MemoryStore, StaticResolver};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::TempDir::new()?;
//! std::fs::write(dir.path().join("gc.log"), b"[0.004s][info][gc] Using G1\n")?;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut relay = RelayBuilder::new(RelayConfig {
//!     log_dir: dir.path().to_path_buf(),
//!     ..RelayConfig::default()
//! })
//! .resolver(Arc::new(StaticResolver::new("mem://pod")))
//! .store(store.clone())
//! .build()?;
//!
//! relay.poll_once();
//! assert_eq!(store.object("mem://pod/gc.log").unwrap(), b"[0.004s][info][gc] Using G1\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! - State is committed only after the remote store confirmed a delivery, so
//!   delivery is at-least-once: a failed or timed-out upload is retried on
//!   the next cycle from the same offset.
//! - State lives in memory only. After a restart the first cycle ships the
//!   whole active log again.
//! - Nothing inside a cycle is fatal; failures are logged and reported in
//!   [`PollReport`].
//!
//! ## Module Organization
//!
//! - [`relay`]: Poll entry point, scheduler and builder
//! - [`tracker`]: Active-file tracker
//! - [`classify`]: Pure classification of the active log
//! - [`sweeper`]: Rotated-file sweeper
//! - [`remote`]: Target resolvers and object stores
//! - [`identity`]: File identity lookup
//! - [`fingerprint`]: Leading-bytes fingerprints
//! - [`staging`]: Temporary copies of byte ranges
//! - [`config`]: Configuration and environment
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

pub mod classify;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod relay;
pub mod remote;
pub mod staging;
pub mod sweeper;
pub mod tracker;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use config::{RelayConfig, RemoteConfig};
pub use error::{RelayError, Result};
pub use identity::{FileIdentity, FileToken};
pub use relay::{GcLogRelay, RelayBuilder};
pub use remote::{ObjectStore, TargetResolver};
pub use sweeper::RotatedSweeper;
pub use tracker::ActiveFileTracker;
pub use types::*;

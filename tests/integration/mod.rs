//! Integration tests for diagrelay
//!
//! Drives full poll cycles against a real directory and an in-memory store,
//! covering the rotation styles a JVM (or a log rotator) applies to its GC
//! log.

use ::diagrelay::remote::{MemoryStore, StaticResolver};
use ::diagrelay::*;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Resolver that hands out a new target on every call
pub struct SequenceResolver {
    counter: Mutex<u32>,
}

impl SequenceResolver {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }
}

impl TargetResolver for SequenceResolver {
    fn resolve(&self, file_name: &str) -> Result<String> {
        let mut counter = self.counter.lock();
        *counter += 1;
        Ok(format!("mem://seq/{}/{}", counter, file_name))
    }
}

/// Test harness around one log directory
pub struct RelayTestHarness {
    pub temp_dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub relay: GcLogRelay,
}

impl RelayTestHarness {
    /// Append-mode relay with a static resolver
    pub fn new() -> Self {
        Self::with(DeliveryPolicy::Append, Arc::new(StaticResolver::new("mem://pod")))
    }

    /// Relay with the given policy and resolver
    pub fn with(policy: DeliveryPolicy, resolver: Arc<dyn TargetResolver>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let relay = RelayBuilder::new(RelayConfig {
            log_dir: temp_dir.path().to_path_buf(),
            policy,
            ..RelayConfig::default()
        })
        .resolver(resolver)
        .store(store.clone())
        .build()
        .unwrap();

        Self {
            temp_dir,
            store,
            relay,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn active(&self) -> PathBuf {
        self.path("gc.log")
    }

    pub fn write(&self, name: &str, content: &[u8]) {
        fs::write(self.path(name), content).unwrap();
    }

    pub fn append(&self, content: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(self.active()).unwrap();
        file.write_all(content).unwrap();
    }

    pub fn truncate_and_write(&self, content: &[u8]) {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.active())
            .unwrap();
        file.write_all(content).unwrap();
    }

    /// Rename the active log to `gc.log.<suffix>` and start a new one
    pub fn rotate(&self, suffix: &str, new_content: &[u8]) {
        fs::rename(self.active(), self.path(&format!("gc.log.{}", suffix))).unwrap();
        self.write("gc.log", new_content);
    }

    pub fn poll(&mut self) -> PollReport {
        let report = self.relay.poll_once();
        info!("{:?}", report);
        report
    }

    pub fn bytes_sent(&self) -> u64 {
        self.relay.tracker().state().bytes_sent
    }

    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }
}

fn delivered(report: &PollReport) -> (Cause, u64, u64) {
    match &report.active {
        Some(ActiveOutcome::Delivered { cause, offset, bytes, .. }) => (*cause, *offset, *bytes),
        other => panic!("expected delivery, got {:?}", other),
    }
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

#[cfg(test)]
mod scenarios {
    use super::*;

    #[test]
    fn test_first_cycle_ships_whole_file() {
        let mut h = RelayTestHarness::new();
        let content = b"first gc log content";
        h.write("gc.log", content);

        assert_eq!(delivered(&h.poll()), (Cause::First, 0, content.len() as u64));
        assert_eq!(h.bytes_sent(), content.len() as u64);
        assert_eq!(h.store.puts()[0].body, content);
    }

    #[test]
    fn test_append_ships_only_new_bytes() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"first gc log content");
        h.poll();
        let before = h.bytes_sent();

        h.append(b"-APPENDED");
        assert_eq!(delivered(&h.poll()), (Cause::Growth, before, 9));
        assert_eq!(h.bytes_sent(), before + 9);
        assert_eq!(h.store.puts().last().unwrap().body, b"-APPENDED");
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_and_recreate_ships_new_file() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"old log data that is long enough");
        h.poll();

        // Keep a handle so the old inode cannot be recycled for the new file
        let _old = fs::File::open(h.active()).unwrap();
        fs::remove_file(h.active()).unwrap();
        h.write("gc.log", b"new log after rotation");

        let report = h.poll();
        assert_eq!(delivered(&report), (Cause::IdentityChanged, 0, 22));
        assert_eq!(h.store.puts().last().unwrap().body, b"new log after rotation");
    }

    #[test]
    fn test_truncate_in_place() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", &[b'X'; 1000]);
        h.poll();

        h.truncate_and_write(b"truncated");
        assert_eq!(delivered(&h.poll()), (Cause::Truncated, 0, 9));
        assert_eq!(h.store.puts().last().unwrap().body, b"truncated");
    }

    #[test]
    fn test_copy_truncate_and_regrow() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", &[b'A'; 500]);
        h.poll();

        h.truncate_and_write(&[b'B'; 800]);
        let (cause, offset, bytes) = delivered(&h.poll());
        assert_eq!(cause, Cause::ContentReplaced);
        assert_eq!(offset, 0);
        assert_eq!(bytes, 800);
        assert_eq!(h.store.object("mem://pod/gc.log").unwrap(), vec![b'B'; 800]);
    }

    #[test]
    fn test_quiescent_cycles_are_idempotent() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"steady");
        h.poll();

        for _ in 0..5 {
            let report = h.poll();
            assert_eq!(
                report.active,
                Some(ActiveOutcome::Skipped { reason: SkipReason::Quiescent })
            );
            assert_eq!(report.bytes_shipped(), 0);
        }
        assert_eq!(h.store.puts().len(), 1);
    }
}

#[cfg(test)]
mod full_flow {
    use super::*;

    #[test]
    fn test_full_flow() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"active content");
        h.write("gc.log.0", b"rotated content 0");
        h.write("gc.log.1", b"rotated content 1");

        let report = h.poll();
        assert_eq!(report.sweep.found, 2);
        assert_eq!(report.sweep.deleted, 2);
        assert_eq!(delivered(&report).0, Cause::First);
        assert_eq!(h.files(), vec!["gc.log".to_string()]);

        assert_eq!(h.store.object("mem://pod/gc.log.0").unwrap(), b"rotated content 0");
        assert_eq!(h.store.object("mem://pod/gc.log.1").unwrap(), b"rotated content 1");
        assert_eq!(h.store.object("mem://pod/gc.log").unwrap(), b"active content");
    }

    #[cfg(unix)]
    #[test]
    fn test_full_rotation_cycle() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"generation one\n");
        h.poll();
        h.append(b"more of one\n");
        h.poll();

        // JVM rotates: gc.log -> gc.log.0, fresh gc.log
        h.rotate("0", b"generation two\n");
        let report = h.poll();

        // The rotated file is shipped whole by the sweeper...
        assert_eq!(report.sweep.deleted, 1);
        assert_eq!(
            h.store.object("mem://pod/gc.log.0").unwrap(),
            b"generation one\nmore of one\n"
        );
        // ...and the new active file from offset 0
        assert_eq!(delivered(&report), (Cause::IdentityChanged, 0, 15));
        assert_eq!(h.store.object("mem://pod/gc.log").unwrap(), b"generation two\n");
        assert_eq!(h.files(), vec!["gc.log".to_string()]);
    }

    #[test]
    fn test_append_reassembles_file_across_cycles() {
        let mut h = RelayTestHarness::new();
        let mut expected = Vec::new();

        h.write("gc.log", b"");
        for i in 0..20 {
            let line = format!("[{}.{:03}s][info][gc] Pause Young {}M->{}M\n", i, i * 7, 100 + i, 20 + i);
            h.append(line.as_bytes());
            expected.extend_from_slice(line.as_bytes());
            if i % 3 == 0 {
                h.poll();
            }
        }
        h.poll();

        assert_eq!(h.store.object("mem://pod/gc.log").unwrap(), expected);
        assert_eq!(h.bytes_sent(), expected.len() as u64);
        assert_eq!(read(&h.active()), expected);
    }

    #[test]
    fn test_outage_loses_nothing() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log", b"before outage\n");
        h.poll();

        h.store.fail_puts(true);
        h.append(b"during outage 1\n");
        assert!(h.poll().has_failures());
        h.append(b"during outage 2\n");
        assert!(h.poll().has_failures());
        assert_eq!(h.bytes_sent(), 14);

        h.store.fail_puts(false);
        let report = h.poll();
        assert_eq!(delivered(&report), (Cause::Growth, 14, 32));
        assert_eq!(
            h.store.object("mem://pod/gc.log").unwrap(),
            b"before outage\nduring outage 1\nduring outage 2\n"
        );
    }

    #[test]
    fn test_rotated_files_survive_outage() {
        let mut h = RelayTestHarness::new();
        h.write("gc.log.0", b"rotated");

        h.store.fail_puts(true);
        let report = h.poll();
        assert_eq!(report.sweep.failed, 1);
        assert!(h.path("gc.log.0").exists());

        h.store.fail_puts(false);
        let report = h.poll();
        assert_eq!(report.sweep.deleted, 1);
        assert!(!h.path("gc.log.0").exists());
    }
}

#[cfg(test)]
mod overwrite_mode {
    use super::*;

    fn harness() -> RelayTestHarness {
        RelayTestHarness::with(DeliveryPolicy::overwrite_default(), Arc::new(SequenceResolver::new()))
    }

    #[test]
    fn test_first_upload_remembers_target() {
        let mut h = harness();
        h.write("gc.log", b"initial content");
        h.poll();

        assert_eq!(
            h.relay.tracker().state().remote_target.as_deref(),
            Some("mem://seq/1/gc.log")
        );
    }

    #[test]
    fn test_small_growth_waits_large_growth_overwrites() {
        let mut h = harness();
        h.write("gc.log", b"initial content");
        h.poll();

        h.append(b"small");
        let report = h.poll();
        assert!(matches!(
            report.active,
            Some(ActiveOutcome::Skipped { reason: SkipReason::BelowThreshold { .. } })
        ));

        h.append(&vec![b'G'; 11 * 1024]);
        let report = h.poll();
        let (cause, offset, bytes) = delivered(&report);
        assert_eq!(cause, Cause::Growth);
        assert_eq!(offset, 0);
        assert_eq!(bytes, read(&h.active()).len() as u64);

        // Same target, overwritten in place
        assert_eq!(h.store.targets(), vec!["mem://seq/1/gc.log".to_string()]);
        assert_eq!(h.store.object("mem://seq/1/gc.log").unwrap(), read(&h.active()));
    }

    #[test]
    fn test_rotation_moves_to_new_target_and_deletes_old() {
        let mut h = harness();
        h.write("gc.log", &[b'A'; 300]);
        h.poll();

        h.truncate_and_write(b"after truncation");
        h.poll();

        assert_eq!(h.store.deletes(), vec!["mem://seq/1/gc.log".to_string()]);
        assert_eq!(h.store.targets(), vec!["mem://seq/2/gc.log".to_string()]);
        assert_eq!(h.store.object("mem://seq/2/gc.log").unwrap(), b"after truncation");
    }
}

//! Property-based testing for diagrelay
//!
//! Uses proptest to check the tracker's invariants over randomly generated
//! observations and over random sequences of producer actions on a real
//! file.

use ::diagrelay::classify::transition;
use ::diagrelay::fingerprint::Fingerprint;
use ::diagrelay::identity::InodeIdentity;
use ::diagrelay::remote::{MemoryStore, StaticResolver};
use ::diagrelay::*;
use chrono::Utc;
use proptest::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Something the log producer does between two cycles
#[derive(Debug, Clone)]
pub enum ProducerAction {
    /// Append bytes to the active log
    Append(Vec<u8>),
    /// Truncate in place and write new content (copy-truncate)
    Rewrite(Vec<u8>),
    /// Rename the active log away and start a new one
    Rotate(Vec<u8>),
    /// Do nothing
    Idle,
}

fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..200)
}

fn producer_action_strategy() -> impl Strategy<Value = ProducerAction> {
    prop_oneof![
        6 => body_strategy().prop_map(ProducerAction::Append),
        1 => body_strategy().prop_map(ProducerAction::Rewrite),
        1 => body_strategy().prop_map(ProducerAction::Rotate),
        2 => Just(ProducerAction::Idle),
    ]
}

fn state_strategy() -> impl Strategy<Value = TrackerState> {
    (0u64..4, prop::collection::vec(any::<u8>(), 0..80), 0u64..300).prop_map(
        |(inode, fingerprint, bytes_sent)| TrackerState {
            inode: FileToken::new(inode),
            fingerprint: Fingerprint::from_bytes(fingerprint),
            bytes_sent,
            remote_target: None,
            last_delivery: None,
        },
    )
}

fn observation_strategy() -> impl Strategy<Value = Observation> {
    (1u64..4, prop::collection::vec(any::<u8>(), 1..64), 1u64..300).prop_map(
        |(inode, fingerprint, size)| Observation {
            size,
            identity: FileToken::new(inode),
            fingerprint: Fingerprint::from_bytes(fingerprint),
        },
    )
}

/// Content of a new generation, tagged so its first byte differs from the last one
fn tagged(generation: u8, body: &[u8]) -> Vec<u8> {
    let mut content = vec![b'a' + generation % 26];
    content.extend_from_slice(body);
    content
}

fn apply(path: &Path, action: &ProducerAction, generation: &mut u8, rotation: &mut u32) {
    match action {
        ProducerAction::Append(body) => {
            let mut file = OpenOptions::new().append(true).open(path).unwrap();
            file.write_all(body).unwrap();
        }
        ProducerAction::Rewrite(body) => {
            *generation += 1;
            let mut file = OpenOptions::new().write(true).truncate(true).open(path).unwrap();
            file.write_all(&tagged(*generation, body)).unwrap();
        }
        ProducerAction::Rotate(body) => {
            *generation += 1;
            *rotation += 1;
            let rotated = path.with_file_name(format!("gc.log.{}", rotation));
            fs::rename(path, rotated).unwrap();
            fs::write(path, tagged(*generation, body)).unwrap();
        }
        ProducerAction::Idle => {}
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Deliveries start at 0 or at the committed offset, and skips keep state
    #[test]
    fn prop_transition_offsets(prior in state_strategy(), observation in observation_strategy()) {
        let t = transition(&prior, &observation, &DeliveryPolicy::Append, Utc::now());
        match &t.action {
            Action::Skip(_) => prop_assert_eq!(&t.next, &prior),
            Action::Deliver(delivery) => {
                prop_assert!(delivery.offset == 0 || delivery.offset == prior.bytes_sent);
                prop_assert!(delivery.offset <= delivery.end);
                prop_assert_eq!(delivery.end, observation.size);
                prop_assert_eq!(t.next.bytes_sent, observation.size);
                prop_assert_eq!(t.next.inode, observation.identity);
                if delivery.offset > 0 {
                    prop_assert_eq!(delivery.cause, Cause::Growth);
                    prop_assert_eq!(&t.next.fingerprint, &prior.fingerprint);
                }
            }
        }
    }

    /// Overwrite deliveries always ship the whole file
    #[test]
    fn prop_overwrite_ships_from_zero(prior in state_strategy(), observation in observation_strategy()) {
        let t = transition(&prior, &observation, &DeliveryPolicy::overwrite_default(), Utc::now());
        if let Action::Deliver(delivery) = &t.action {
            prop_assert_eq!(delivery.offset, 0);
            prop_assert_eq!(delivery.len(), observation.size);
        }
    }

    /// Applying a transition's next state to the same observation is quiescent
    #[test]
    fn prop_second_look_is_quiescent(prior in state_strategy(), observation in observation_strategy()) {
        let t = transition(&prior, &observation, &DeliveryPolicy::Append, Utc::now());
        let again = transition(&t.next, &observation, &DeliveryPolicy::Append, Utc::now());
        prop_assert_eq!(again.action, Action::Skip(SkipReason::Quiescent));
    }
}

#[cfg(unix)]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// With a stable target, the remote object always mirrors the active log
    /// after a successful cycle, whatever the producer did in between.
    #[test]
    fn prop_remote_mirrors_active_log(
        initial in body_strategy(),
        actions in prop::collection::vec(producer_action_strategy(), 1..15)
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gc.log");
        fs::write(&path, tagged(0, &initial)).unwrap();

        let store = MemoryStore::new();
        let resolver = StaticResolver::new("mem://pod");
        let mut tracker = ActiveFileTracker::new(&path, Arc::new(InodeIdentity)).unwrap();

        let mut generation = 0u8;
        let mut rotation = 0u32;
        tracker.poll(&resolver, &store);

        for action in &actions {
            apply(&path, action, &mut generation, &mut rotation);
            let outcome = tracker.poll(&resolver, &store);
            prop_assert!(!outcome.is_failure(), "cycle failed: {:?}", outcome);

            let content = fs::read(&path).unwrap();
            prop_assert_eq!(store.object("mem://pod/gc.log").unwrap(), content.clone());
            prop_assert_eq!(tracker.state().bytes_sent, content.len() as u64);
        }
    }

    /// Only appends: every byte is shipped exactly once
    #[test]
    fn prop_appends_ship_each_byte_once(
        chunks in prop::collection::vec(body_strategy(), 1..12)
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gc.log");
        fs::write(&path, b"").unwrap();

        let store = MemoryStore::new();
        let resolver = StaticResolver::new("mem://pod");
        let mut tracker = ActiveFileTracker::new(&path, Arc::new(InodeIdentity)).unwrap();

        let mut total = 0u64;
        for chunk in &chunks {
            apply(&path, &ProducerAction::Append(chunk.clone()), &mut 0, &mut 0);
            total += chunk.len() as u64;
            tracker.poll(&resolver, &store);
        }

        let shipped: u64 = store.puts().iter().map(|p| p.body.len() as u64).sum();
        prop_assert_eq!(shipped, total);
    }
}

//! Classification of the active log
//!
//! This is the decision half of the active-file tracker, kept free of any I/O
//! so every row of the decision table can be tested with plain values.
//!
//! ## Decision Table
//!
//! Conditions are evaluated in order; the first match wins.
//!
//! | Condition                               | Cause              | Resume from  |
//! |-----------------------------------------|--------------------|--------------|
//! | no prior state                          | `First`            | 0            |
//! | identity differs                        | `IdentityChanged`  | 0            |
//! | size < bytes sent                       | `Truncated`        | 0            |
//! | leading bytes differ                    | `ContentReplaced`  | 0            |
//! | size == bytes sent                      | skip (quiescent)   | -            |
//! | size > bytes sent                       | `Growth`           | bytes sent   |
//!
//! Size alone is not evidence of continuity: a copy-truncate that regrows past
//! the previously shipped size looks like growth. The fingerprint row exists
//! to catch exactly that case.
//!
//! The [`DeliveryPolicy`] then shapes the delivery: `Append` resumes from the
//! offset above, `Overwrite` always ships from 0 and may hold growth back.

use crate::types::{
    Action, Cause, Delivery, DeliveryPolicy, Observation, SkipReason, TargetPlan, TrackerState,
    Transition,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Classify an observation against the prior state.
///
/// Returns `None` when nothing changed since the last delivery.
pub fn classify(prior: &TrackerState, observation: &Observation) -> Option<Cause> {
    if prior.is_empty() {
        return Some(Cause::First);
    }
    if observation.identity != prior.inode {
        return Some(Cause::IdentityChanged);
    }
    if observation.size < prior.bytes_sent {
        return Some(Cause::Truncated);
    }
    if !observation.fingerprint.continues(&prior.fingerprint) {
        return Some(Cause::ContentReplaced);
    }
    if observation.size == prior.bytes_sent {
        return None;
    }
    Some(Cause::Growth)
}

/// Compute the action for this cycle and the state to commit if it succeeds.
///
/// # Arguments
///
/// * `prior` - State committed by the last successful delivery
/// * `observation` - What is on disk now
/// * `policy` - How growth is shipped
/// * `now` - Cycle timestamp, used for the overwrite age threshold
pub fn transition(
    prior: &TrackerState,
    observation: &Observation,
    policy: &DeliveryPolicy,
    now: DateTime<Utc>,
) -> Transition {
    let Some(cause) = classify(prior, observation) else {
        return skip(prior, SkipReason::Quiescent);
    };

    let (offset, target) = match policy {
        DeliveryPolicy::Append => {
            let offset = if cause == Cause::Growth { prior.bytes_sent } else { 0 };
            (offset, TargetPlan::Fresh)
        }
        DeliveryPolicy::Overwrite { min_growth_bytes, max_upload_age } => {
            if cause == Cause::Growth {
                let growth = observation.size - prior.bytes_sent;
                if let Some(age) = upload_age(prior, now) {
                    if growth < *min_growth_bytes && age < *max_upload_age {
                        return skip(prior, SkipReason::BelowThreshold { growth, age });
                    }
                }
            }
            (0, overwrite_target(prior, cause))
        }
    };

    // A continuing lineage keeps the width it was born with
    let fingerprint = if cause == Cause::Growth {
        prior.fingerprint.clone()
    } else {
        observation.fingerprint.clone()
    };

    Transition {
        action: Action::Deliver(Delivery {
            offset,
            end: observation.size,
            cause,
            target,
        }),
        next: TrackerState {
            inode: observation.identity,
            fingerprint,
            bytes_sent: observation.size,
            remote_target: prior.remote_target.clone(),
            last_delivery: Some(now),
        },
    }
}

fn skip(prior: &TrackerState, reason: SkipReason) -> Transition {
    Transition {
        action: Action::Skip(reason),
        next: prior.clone(),
    }
}

/// Time since the last confirmed delivery, `None` if there never was one
fn upload_age(prior: &TrackerState, now: DateTime<Utc>) -> Option<Duration> {
    prior
        .last_delivery
        .map(|last| (now - last).to_std().unwrap_or(Duration::ZERO))
}

fn overwrite_target(prior: &TrackerState, cause: Cause) -> TargetPlan {
    match (&prior.remote_target, cause.is_rotation()) {
        (Some(previous), true) => TargetPlan::Replace {
            previous: previous.clone(),
        },
        (Some(existing), false) => TargetPlan::Reuse(existing.clone()),
        (None, _) => TargetPlan::Fresh,
    }
}

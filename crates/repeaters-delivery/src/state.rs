// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeat record state machine.
//!
//! [`transition`] is a pure function of the delivery outcome, the number of
//! attempts already in the log, the record's age and the retry policy. The
//! worker persists its result through
//! [`RecordStore::complete`](repeaters_core::RecordStore::complete).

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use repeaters_core::{DeliveryError, RecordState, Transition};

use crate::backoff::RetryPolicy;

/// A destination accepted the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Response summary recorded in the attempt log.
    pub message: String,
    /// Identifier the destination assigned, to be written back to the payload.
    pub external_id: Option<String>,
}

impl Delivered {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }
}

/// Result of one processing pass of one record.
pub type Outcome = Result<Delivered, DeliveryError>;

/// Compute the next state for a record after one processing pass.
///
/// `prior_attempts` counts the attempts logged before this pass, so this
/// pass is attempt number `prior_attempts + 1`.
pub fn transition(
    outcome: &Outcome,
    prior_attempts: u32,
    registered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Transition {
    let attempt = prior_attempts.saturating_add(1);
    match outcome {
        Ok(delivered) => Transition {
            state: RecordState::Success,
            next_check: None,
            error_kind: None,
            message: delivered.message.clone(),
            attempted_at: now,
        },
        Err(err) if err.is_retryable() => {
            if attempt >= policy.max_attempts {
                cancelled(
                    err,
                    format!("{err} (giving up after {attempt} attempts)"),
                    now,
                )
            } else if now - registered_at >= to_delta(policy.max_age) {
                cancelled(err, format!("{err} (maximum age exceeded)"), now)
            } else {
                Transition {
                    state: RecordState::Failure,
                    next_check: Some(add(now, policy.delay(attempt))),
                    error_kind: Some(err.kind()),
                    message: err.to_string(),
                    attempted_at: now,
                }
            }
        }
        Err(err) => cancelled(err, err.to_string(), now),
    }
}

fn cancelled(err: &DeliveryError, message: String, now: DateTime<Utc>) -> Transition {
    Transition {
        state: RecordState::Cancelled,
        next_check: None,
        error_kind: Some(err.kind()),
        message,
        attempted_at: now,
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn add(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder can collect these metrics.
//! Without an installed recorder every call is a no-op.

use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use repeaters_core::{ErrorKind, RecordState};

pub const ATTEMPTS_TOTAL: &str = "repeaters_attempts_total";
pub const SELECTION_ERRORS_TOTAL: &str = "repeaters_selection_errors_total";
pub const WRITE_BACK_FAILURES_TOTAL: &str = "repeaters_write_back_failures_total";
pub const SEND_LATENCY_SECONDS: &str = "repeaters_send_latency_seconds";
pub const DUE_RECORDS: &str = "repeaters_due_records";

/// Register all metric descriptions. Called once after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        ATTEMPTS_TOTAL,
        "Delivery attempts by resulting state and error kind"
    );
    describe_counter!(
        SELECTION_ERRORS_TOTAL,
        "Failed due-record selection queries"
    );
    describe_counter!(
        WRITE_BACK_FAILURES_TOTAL,
        "External id write-backs that failed after a successful send"
    );
    describe_histogram!(
        SEND_LATENCY_SECONDS,
        "Destination round-trip latency in seconds"
    );
    describe_gauge!(DUE_RECORDS, "Records returned by the last selection poll");
}

/// Record one appended attempt.
pub fn record_attempt(state: RecordState, kind: Option<ErrorKind>) {
    let kind = kind.map_or_else(|| "none".to_string(), |k| k.to_string());
    metrics::counter!(ATTEMPTS_TOTAL, "state" => state.to_string(), "kind" => kind).increment(1);
}

pub fn record_selection_error() {
    metrics::counter!(SELECTION_ERRORS_TOTAL).increment(1);
}

pub fn record_write_back_failure(repeater_kind: &'static str) {
    metrics::counter!(WRITE_BACK_FAILURES_TOTAL, "repeater_kind" => repeater_kind).increment(1);
}

/// Record destination latency, labelled by repeater kind.
pub fn record_send_latency(repeater_kind: &'static str, elapsed: Duration) {
    metrics::histogram!(SEND_LATENCY_SECONDS, "repeater_kind" => repeater_kind)
        .record(elapsed.as_secs_f64());
}

pub fn set_due_records(count: usize) {
    metrics::gauge!(DUE_RECORDS).set(count as f64);
}

// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-repeater send pipeline.
//!
//! A [`Worker`] processes one repeater's batch of due records in order:
//! claim, resolve payload, transform, send, evaluate the transition and
//! persist it with its attempt. A retryable destination failure stops the
//! batch; records not yet attempted keep their state and `next_check`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use repeaters_core::{
    ClaimedRecord, DeliveryError, Payload, PayloadSource, PayloadWriteBack, RecordState,
    RecordStore, RepeatRecord, Repeater, RepeaterError, RepeaterKind,
};
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::client::{DestinationClient, DestinationResponse};
use crate::state::{Delivered, Outcome, transition};
use crate::transform::{self, WireRequest};

/// Counts for one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Claimed by another worker, or the claim was lost before completion.
    pub skipped: usize,
    /// Left unattempted after a retryable destination failure.
    pub deferred: usize,
    pub short_circuited: bool,
}

impl BatchReport {
    /// Attempts appended by this batch.
    pub fn attempts(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
        self.short_circuited |= other.short_circuited;
    }

    fn count(&mut self, state: RecordState) {
        match state {
            RecordState::Success => self.succeeded += 1,
            RecordState::Failure => self.failed += 1,
            RecordState::Cancelled => self.cancelled += 1,
            RecordState::Pending => {}
        }
    }
}

/// Processes repeater batches against a record store and payload source.
///
/// Cheap to clone; clones share the store, payload source and HTTP pool.
#[derive(Clone)]
pub struct Worker {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) payloads: Arc<dyn PayloadSource>,
    pub(crate) write_back: Arc<dyn PayloadWriteBack>,
    pub(crate) client: DestinationClient,
    pub(crate) policy: RetryPolicy,
    worker_id: String,
    claim_lease: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        payloads: Arc<dyn PayloadSource>,
        write_back: Arc<dyn PayloadWriteBack>,
        client: DestinationClient,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            payloads,
            write_back,
            client,
            policy,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            claim_lease: Duration::from_secs(300),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Process one repeater's due records, in the order given.
    ///
    /// Record-level failures never surface here; only storage errors do.
    pub async fn process_batch(
        &self,
        repeater: &Repeater,
        records: Vec<RepeatRecord>,
    ) -> Result<BatchReport, RepeaterError> {
        match &repeater.kind {
            RepeaterKind::Fhir(opts) => self.process_fhir_batch(repeater, opts, records).await,
            _ => self.process_sequential(repeater, records).await,
        }
    }

    async fn process_sequential(
        &self,
        repeater: &Repeater,
        records: Vec<RepeatRecord>,
    ) -> Result<BatchReport, RepeaterError> {
        let mut report = BatchReport::default();
        let mut remaining = records.into_iter();

        while let Some(record) = remaining.next() {
            let Some(claim) = self.claim(repeater, &record).await? else {
                report.skipped += 1;
                continue;
            };
            let outcome = match self.fetch_payload(&claim).await? {
                Ok(payload) => self.deliver(repeater, &payload).await,
                Err(err) => Err(err),
            };
            let stop = matches!(&outcome, Err(err) if err.is_retryable());
            self.finish(repeater, &claim, outcome, &mut report).await?;

            if stop {
                report.short_circuited = true;
                report.deferred = remaining.len();
                info!(
                    repeater_id = %repeater.id,
                    deferred = report.deferred,
                    "destination failing, stopping batch"
                );
                break;
            }
        }
        Ok(report)
    }

    async fn deliver(&self, repeater: &Repeater, payload: &Payload) -> Outcome {
        let request = transform::transform(&repeater.kind, payload)?;
        let response = self.send(repeater, &request).await?;
        Ok(Delivered::new(response.summary()))
    }

    /// Lease length for claims on `repeater`: the configured lease, but at
    /// least two of the repeater's request timeouts.
    pub(crate) fn lease_for(&self, repeater: &Repeater) -> TimeDelta {
        let request_timeout = self.client.timeout_for(&repeater.connection);
        let lease = self.claim_lease.max(request_timeout.saturating_mul(2));
        TimeDelta::from_std(lease).unwrap_or(TimeDelta::MAX)
    }

    pub(crate) fn lease_until(&self, repeater: &Repeater, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease_for(repeater))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Claim a record for this worker.
    pub(crate) async fn claim(
        &self,
        repeater: &Repeater,
        record: &RepeatRecord,
    ) -> Result<Option<ClaimedRecord>, RepeaterError> {
        let now = Utc::now();
        let lease_until = self.lease_until(repeater, now);
        let claim = self
            .store
            .claim(&record.id, &self.worker_id, now, lease_until)
            .await?;
        if claim.is_none() {
            debug!(record_id = %record.id, "record claimed elsewhere or no longer due");
        }
        Ok(claim)
    }

    /// Resolve the claimed record's payload.
    ///
    /// On a payload source error the claim is released before the error
    /// propagates.
    pub(crate) async fn fetch_payload(
        &self,
        claim: &ClaimedRecord,
    ) -> Result<Result<Payload, DeliveryError>, RepeaterError> {
        let record = &claim.record;
        match self.payloads.fetch(&record.domain, &record.payload_id).await {
            Ok(Some(payload)) => Ok(Ok(payload)),
            Ok(None) => Ok(Err(DeliveryError::PayloadMissing {
                payload_id: record.payload_id.clone(),
            })),
            Err(err) => {
                self.release_all([claim]).await;
                Err(err)
            }
        }
    }

    pub(crate) async fn send(
        &self,
        repeater: &Repeater,
        request: &WireRequest,
    ) -> Result<DestinationResponse, DeliveryError> {
        let started = Instant::now();
        let result = self.client.send(&repeater.connection, request).await;
        repeaters_prometheus::record_send_latency(repeater.kind.name(), started.elapsed());
        result
    }

    /// Persist the outcome of one pass and run write-back for new ids.
    pub(crate) async fn finish(
        &self,
        repeater: &Repeater,
        claim: &ClaimedRecord,
        outcome: Outcome,
        report: &mut BatchReport,
    ) -> Result<(), RepeaterError> {
        let record = &claim.record;
        let next = transition(
            &outcome,
            claim.prior_attempts,
            record.registered_at,
            Utc::now(),
            &self.policy,
        );

        if self.store.complete(claim, &next).await? {
            report.count(next.state);
            repeaters_prometheus::record_attempt(next.state, next.error_kind);
            match next.state {
                RecordState::Success => debug!(
                    record_id = %record.id,
                    repeater_id = %repeater.id,
                    message = %next.message,
                    "record delivered"
                ),
                _ => info!(
                    record_id = %record.id,
                    repeater_id = %repeater.id,
                    state = %next.state,
                    attempt = claim.prior_attempts + 1,
                    next_check = ?next.next_check,
                    message = %next.message,
                    "delivery attempt failed"
                ),
            }
        } else {
            report.skipped += 1;
            warn!(
                record_id = %record.id,
                worker_id = %self.worker_id,
                "claim lost before completion, attempt discarded"
            );
        }

        if let Ok(Delivered {
            external_id: Some(external_id),
            ..
        }) = &outcome
        {
            self.write_back(repeater, record, external_id).await;
        }
        Ok(())
    }

    async fn write_back(&self, repeater: &Repeater, record: &RepeatRecord, external_id: &str) {
        match self
            .write_back
            .set_external_reference(&record.domain, &record.payload_id, external_id)
            .await
        {
            Ok(()) => debug!(
                payload_id = %record.payload_id,
                external_id,
                "external id written back"
            ),
            Err(err) => {
                repeaters_prometheus::record_write_back_failure(repeater.kind.name());
                warn!(
                    record_id = %record.id,
                    payload_id = %record.payload_id,
                    external_id,
                    error_kind = %repeaters_core::ErrorKind::WriteBackFailure,
                    error = %err,
                    "failed to write external id back to payload"
                );
            }
        }
    }

    /// Release claims without writing attempts. Returns how many were released.
    pub(crate) async fn release_all<'a>(
        &self,
        claims: impl IntoIterator<Item = &'a ClaimedRecord>,
    ) -> usize {
        let mut released = 0;
        for claim in claims {
            match self.store.release(claim).await {
                Ok(()) => released += 1,
                Err(err) => warn!(
                    record_id = %claim.record.id,
                    error = %err,
                    "failed to release claim; it will expire with its lease"
                ),
            }
        }
        released
    }
}

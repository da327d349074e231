// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record store trait: repeaters, repeat records and the attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepeaterError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Attempt, ClaimedRecord, RecordCounts, RecordFilter, RepeatRecord, Repeater, SelectionScope,
    Transition,
};

/// Persistence for the delivery pipeline.
///
/// Implementations must make [`claim`](RecordStore::claim) and
/// [`complete`](RecordStore::complete) atomic: at most one claimant holds a
/// record at a time, and completion appends the attempt and updates the
/// record in a single transaction only while the claim is still held.
#[async_trait]
pub trait RecordStore: PluginAdapter {
    // --- repeaters ---

    async fn upsert_repeater(&self, repeater: &Repeater) -> Result<(), RepeaterError>;

    async fn get_repeater(&self, id: &str) -> Result<Option<Repeater>, RepeaterError>;

    /// Lists repeaters, optionally restricted to one domain. Disabled
    /// repeaters are included.
    async fn list_repeaters(&self, domain: Option<&str>) -> Result<Vec<Repeater>, RepeaterError>;

    /// Soft-deletes a repeater. Its records stay but are no longer selected.
    async fn disable_repeater(&self, id: &str) -> Result<(), RepeaterError>;

    // --- records ---

    async fn insert_record(&self, record: &RepeatRecord) -> Result<(), RepeaterError>;

    async fn get_record(&self, id: &str) -> Result<Option<RepeatRecord>, RepeaterError>;

    /// Paged listing, newest registration first.
    async fn list_records(
        &self,
        filter: &RecordFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RepeatRecord>, RepeaterError>;

    async fn count_records(&self, filter: &RecordFilter) -> Result<u64, RepeaterError>;

    /// Counts by state, plus selectable records due before `overdue_before`.
    async fn record_counts(
        &self,
        domain: Option<&str>,
        overdue_before: DateTime<Utc>,
    ) -> Result<RecordCounts, RepeaterError>;

    async fn domains_with_records(&self) -> Result<Vec<String>, RepeaterError>;

    /// Returns up to `limit` due, unclaimed records of enabled repeaters,
    /// ordered by `next_check` then `registered_at`.
    async fn select_due(
        &self,
        scope: &SelectionScope,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RepeatRecord>, RepeaterError>;

    /// Atomically claims a due record. Returns `None` when another claimant
    /// holds it or it is no longer due.
    async fn claim(
        &self,
        record_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<ClaimedRecord>, RepeaterError>;

    /// Appends one attempt, applies the transition and clears the lease.
    /// Returns `false` when the claim was lost; nothing is written then.
    async fn complete(
        &self,
        claim: &ClaimedRecord,
        transition: &Transition,
    ) -> Result<bool, RepeaterError>;

    /// Extends a held claim to `lease_until`. Returns `false` when the claim
    /// was lost to another claimant or the record left a selectable state.
    async fn renew_claim(
        &self,
        claim: &ClaimedRecord,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepeaterError>;

    /// Drops a claim without writing an attempt.
    async fn release(&self, claim: &ClaimedRecord) -> Result<(), RepeaterError>;

    /// Attempts of one record, oldest first.
    async fn attempts(&self, record_id: &str) -> Result<Vec<Attempt>, RepeaterError>;

    // --- operator actions ---

    /// Cancels a non-terminal record, appending an operator attempt.
    async fn cancel_record(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError>;

    /// Makes a non-terminal record due immediately. No attempt is appended.
    async fn retry_now(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError>;

    /// Creates a fresh pending record for the same repeater and payload.
    async fn resend(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError>;

    /// Deletes every record (and, by cascade, attempt) of a domain.
    async fn purge_domain(&self, domain: &str) -> Result<u64, RepeaterError>;
}

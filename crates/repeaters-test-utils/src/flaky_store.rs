// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record store wrapper whose due-record selection fails on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repeaters_core::{
    AdapterType, Attempt, ClaimedRecord, HealthStatus, PluginAdapter, RecordCounts, RecordFilter,
    RecordStore, RepeatRecord, RepeaterError, Repeater, SelectionScope, Transition,
};

/// Delegates to an inner store, except that the first `failures` calls to
/// `select_due` return a storage error.
pub struct FlakySelectStore {
    inner: Arc<dyn RecordStore>,
    remaining_failures: AtomicU32,
    select_calls: AtomicU32,
}

impl FlakySelectStore {
    pub fn new(inner: Arc<dyn RecordStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            select_calls: AtomicU32::new(0),
        }
    }

    /// Number of `select_due` calls so far, failed ones included.
    pub fn select_calls(&self) -> u32 {
        self.select_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginAdapter for FlakySelectStore {
    fn name(&self) -> &str {
        "flaky-select"
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::RecordStore
    }

    async fn health_check(&self) -> Result<HealthStatus, RepeaterError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), RepeaterError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl RecordStore for FlakySelectStore {
    async fn upsert_repeater(&self, repeater: &Repeater) -> Result<(), RepeaterError> {
        self.inner.upsert_repeater(repeater).await
    }

    async fn get_repeater(&self, id: &str) -> Result<Option<Repeater>, RepeaterError> {
        self.inner.get_repeater(id).await
    }

    async fn list_repeaters(&self, domain: Option<&str>) -> Result<Vec<Repeater>, RepeaterError> {
        self.inner.list_repeaters(domain).await
    }

    async fn disable_repeater(&self, id: &str) -> Result<(), RepeaterError> {
        self.inner.disable_repeater(id).await
    }

    async fn insert_record(&self, record: &RepeatRecord) -> Result<(), RepeaterError> {
        self.inner.insert_record(record).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<RepeatRecord>, RepeaterError> {
        self.inner.get_record(id).await
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RepeatRecord>, RepeaterError> {
        self.inner.list_records(filter, offset, limit).await
    }

    async fn count_records(&self, filter: &RecordFilter) -> Result<u64, RepeaterError> {
        self.inner.count_records(filter).await
    }

    async fn record_counts(
        &self,
        domain: Option<&str>,
        overdue_before: DateTime<Utc>,
    ) -> Result<RecordCounts, RepeaterError> {
        self.inner.record_counts(domain, overdue_before).await
    }

    async fn domains_with_records(&self) -> Result<Vec<String>, RepeaterError> {
        self.inner.domains_with_records().await
    }

    async fn select_due(
        &self,
        scope: &SelectionScope,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RepeatRecord>, RepeaterError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepeaterError::Storage {
                source: "database is locked".into(),
            });
        }
        self.inner.select_due(scope, now, limit).await
    }

    async fn claim(
        &self,
        record_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<ClaimedRecord>, RepeaterError> {
        self.inner.claim(record_id, worker_id, now, lease_until).await
    }

    async fn complete(
        &self,
        claim: &ClaimedRecord,
        transition: &Transition,
    ) -> Result<bool, RepeaterError> {
        self.inner.complete(claim, transition).await
    }

    async fn renew_claim(
        &self,
        claim: &ClaimedRecord,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepeaterError> {
        self.inner.renew_claim(claim, lease_until).await
    }

    async fn release(&self, claim: &ClaimedRecord) -> Result<(), RepeaterError> {
        self.inner.release(claim).await
    }

    async fn attempts(&self, record_id: &str) -> Result<Vec<Attempt>, RepeaterError> {
        self.inner.attempts(record_id).await
    }

    async fn cancel_record(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        self.inner.cancel_record(record_id, now).await
    }

    async fn retry_now(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        self.inner.retry_now(record_id, now).await
    }

    async fn resend(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        self.inner.resend(record_id, now).await
    }

    async fn purge_domain(&self, domain: &str) -> Result<u64, RepeaterError> {
        self.inner.purge_domain(domain).await
    }
}

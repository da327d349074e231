// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduler loop.
//!
//! Each poll selects a page of due records, groups it by repeater and runs
//! one batch per repeater on its own task, bounded by a semaphore. Due
//! records are recomputed on every poll; nothing is cached between polls.
//! A repeater whose batch short-circuited is left out of selection until one
//! `poll_interval` has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use repeaters_config::model::SchedulerConfig;
use repeaters_core::{RecordStore, RepeatRecord, RepeaterError, SelectionScope};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::worker::{BatchReport, Worker};

/// Dispatcher tuning, usually taken from `[scheduler]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub poll_interval: Duration,
    pub page_size: u32,
    pub selection_retry_delay: Duration,
    pub max_concurrent_repeaters: usize,
    pub scope: SelectionScope,
}

impl DispatcherSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            page_size: config.page_size,
            selection_retry_delay: Duration::from_secs(config.selection_retry_delay_secs),
            max_concurrent_repeaters: config.max_concurrent_repeaters,
            scope: SelectionScope {
                domains: config.domains.clone(),
                repeater_ids: config.repeater_ids.clone(),
                excluded_repeater_ids: Vec::new(),
            },
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Summary of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub selected: usize,
    pub batches: usize,
    /// Repeaters whose batch was skipped because they vanished or were disabled.
    pub skipped_repeaters: usize,
    /// Batches that ended with a storage error.
    pub failed_batches: usize,
    /// The page was full, so more records may be due.
    pub full_page: bool,
    /// Repeaters paused after their batch short-circuited.
    pub paused_repeaters: Vec<String>,
    pub records: BatchReport,
}

pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    worker: Worker,
    settings: DispatcherSettings,
    permits: Arc<Semaphore>,
    paused: Mutex<HashMap<String, Instant>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RecordStore>, worker: Worker, settings: DispatcherSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_repeaters.max(1)));
        Self {
            store,
            worker,
            settings,
            permits,
            paused: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Select one page of due records and process it to completion.
    ///
    /// Only a failed selection is an error; batch failures are logged and
    /// counted in the report. Started batches always run to completion.
    pub async fn poll_once(&self) -> Result<PollReport, RepeaterError> {
        let scope = self.current_scope().await;
        let due = self
            .store
            .select_due(&scope, Utc::now(), self.settings.page_size)
            .await?;
        repeaters_prometheus::set_due_records(due.len());

        let mut report = PollReport {
            selected: due.len(),
            full_page: due.len() as u64 >= u64::from(self.settings.page_size),
            ..PollReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for (repeater_id, records) in group_by_repeater(due) {
            let repeater = match self.store.get_repeater(&repeater_id).await {
                Ok(Some(repeater)) if repeater.enabled => repeater,
                Ok(_) => {
                    debug!(repeater_id = %repeater_id, "repeater missing or disabled, skipping batch");
                    report.skipped_repeaters += 1;
                    continue;
                }
                Err(err) => {
                    report.failed_batches += 1;
                    error!(repeater_id = %repeater_id, error = %err, "failed to load repeater");
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                error!("dispatcher semaphore closed, not starting further batches");
                break;
            };
            let worker = self.worker.clone();
            report.batches += 1;
            tasks.spawn(async move {
                let _permit = permit;
                let result = worker.process_batch(&repeater, records).await;
                (repeater.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((repeater_id, Ok(batch))) => {
                    if batch.short_circuited {
                        report.paused_repeaters.push(repeater_id);
                    }
                    report.records.merge(&batch);
                }
                Ok((repeater_id, Err(err))) => {
                    report.failed_batches += 1;
                    error!(repeater_id = %repeater_id, error = %err, "repeater batch failed");
                }
                Err(err) => {
                    report.failed_batches += 1;
                    error!(error = %err, "repeater batch task panicked");
                }
            }
        }

        if !report.paused_repeaters.is_empty() {
            let until = Instant::now() + self.settings.poll_interval;
            let mut paused = self.paused.lock().await;
            for repeater_id in &report.paused_repeaters {
                debug!(repeater_id = %repeater_id, "pausing repeater until next poll interval");
                paused.insert(repeater_id.clone(), until);
            }
        }

        debug!(
            selected = report.selected,
            batches = report.batches,
            attempts = report.records.attempts(),
            deferred = report.records.deferred,
            "poll complete"
        );
        Ok(report)
    }

    /// The configured scope minus repeaters that are still paused.
    async fn current_scope(&self) -> SelectionScope {
        let mut paused = self.paused.lock().await;
        let now = Instant::now();
        paused.retain(|_, until| *until > now);
        let mut scope = self.settings.scope.clone();
        scope.excluded_repeater_ids.extend(paused.keys().cloned());
        scope
    }

    /// Poll until `cancel` fires.
    ///
    /// A poll in progress always runs to completion, so in-flight batches
    /// drain before this returns.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            page_size = self.settings.page_size,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            max_concurrent = self.settings.max_concurrent_repeaters,
            worker_id = %self.worker.worker_id(),
            "dispatcher started"
        );

        while !cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                // A full page that attempted nothing is held by other workers.
                Ok(report) if report.full_page && report.records.attempts() > 0 => Duration::ZERO,
                Ok(_) => self.settings.poll_interval,
                Err(err) => {
                    repeaters_prometheus::record_selection_error();
                    warn!(
                        error = %err,
                        error_kind = %repeaters_core::ErrorKind::SelectionStoreError,
                        retry_in_secs = self.settings.selection_retry_delay.as_secs(),
                        "failed to select due records"
                    );
                    self.settings.selection_retry_delay
                }
            };
            if pause.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("dispatcher stopped");
    }
}

/// Group records by repeater, keeping first-seen repeater order and the
/// selection order within each group.
pub fn group_by_repeater(records: Vec<RepeatRecord>) -> Vec<(String, Vec<RepeatRecord>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<RepeatRecord>)> = Vec::new();
    for record in records {
        match index.get(&record.repeater_id) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(record.repeater_id.clone(), groups.len());
                groups.push((record.repeater_id.clone(), vec![record]));
            }
        }
    }
    groups
}

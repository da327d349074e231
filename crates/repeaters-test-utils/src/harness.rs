// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end delivery tests.
//!
//! `TestHarness` opens SQLite storage in a temp directory and offers helpers
//! to seed repeaters, payloads and records and to read back record state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use repeaters_config::model::{RepeatersConfig, StorageConfig};
use repeaters_core::{
    Attempt, Payload, RecordStore, RepeatRecord, Repeater, RepeaterError,
};
use repeaters_storage::SqliteStorage;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: RepeatersConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: RepeatersConfig::default(),
        }
    }

    /// Replace the configuration. The storage path is always overridden.
    pub fn with_config(mut self, config: RepeatersConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the harness, creating and migrating the temp database.
    pub async fn build(mut self) -> Result<TestHarness, RepeaterError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| RepeaterError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        self.config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };
        let storage = SqliteStorage::new(self.config.storage.clone());
        storage.initialize().await?;

        Ok(TestHarness {
            storage: Arc::new(storage),
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

/// A temp-database test environment.
pub struct TestHarness {
    /// Record store, payload source and write-back in one (temp DB, cleaned up on drop).
    pub storage: Arc<SqliteStorage>,
    pub config: RepeatersConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default configuration.
    pub async fn new() -> Result<Self, RepeaterError> {
        Self::builder().build().await
    }

    pub async fn add_repeater(&self, repeater: Repeater) -> Result<Repeater, RepeaterError> {
        self.storage.upsert_repeater(&repeater).await?;
        Ok(repeater)
    }

    pub async fn add_payload(&self, payload: &Payload) -> Result<(), RepeaterError> {
        self.storage.put_payload(payload).await
    }

    /// Insert a PENDING record for `payload_id`, due now.
    pub async fn enqueue(
        &self,
        repeater: &Repeater,
        payload: &Payload,
    ) -> Result<RepeatRecord, RepeaterError> {
        self.enqueue_at(repeater, payload, Utc::now()).await
    }

    /// Insert a PENDING record registered (and due) at `registered_at`.
    pub async fn enqueue_at(
        &self,
        repeater: &Repeater,
        payload: &Payload,
        registered_at: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        let record = RepeatRecord::new_pending(
            &repeater.domain,
            &repeater.id,
            &payload.id,
            payload.payload_type,
            registered_at,
        );
        self.storage.insert_record(&record).await?;
        Ok(record)
    }

    /// Re-read a record, failing when it does not exist.
    pub async fn record(&self, id: &str) -> Result<RepeatRecord, RepeaterError> {
        self.storage
            .get_record(id)
            .await?
            .ok_or_else(|| RepeaterError::NotFound {
                entity: "repeat record",
                id: id.to_string(),
            })
    }

    pub async fn attempts(&self, id: &str) -> Result<Vec<Attempt>, RepeaterError> {
        self.storage.attempts(id).await
    }
}

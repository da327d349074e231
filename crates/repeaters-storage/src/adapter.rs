// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the record store, payload source and write-back
//! traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use repeaters_config::model::StorageConfig;
use repeaters_core::{
    AdapterType, Attempt, ClaimedRecord, HealthStatus, Payload, PayloadSource, PayloadWriteBack,
    PluginAdapter, RecordCounts, RecordFilter, RecordStore, RepeatRecord, Repeater,
    RepeaterError, SelectionScope, Transition,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules.
/// The database is opened by [`SqliteStorage::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new adapter. No connection is opened until [`initialize`](Self::initialize).
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Create and initialize in one step.
    pub async fn open(config: StorageConfig) -> Result<Self, RepeaterError> {
        let storage = Self::new(config);
        storage.initialize().await?;
        Ok(storage)
    }

    /// Open the database and run migrations. Fails if called twice.
    pub async fn initialize(&self) -> Result<(), RepeaterError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| RepeaterError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    /// Returns the underlying Database, or an error if not initialized.
    pub fn database(&self) -> Result<&Database, RepeaterError> {
        self.db.get().ok_or_else(|| RepeaterError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    /// Insert or replace a document in the bundled payload store.
    pub async fn put_payload(&self, payload: &Payload) -> Result<(), RepeaterError> {
        queries::payloads::put_payload(self.database()?, payload).await
    }

    async fn checkpoint(&self) -> Result<(), RepeaterError> {
        self.database()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::RecordStore
    }

    async fn health_check(&self) -> Result<HealthStatus, RepeaterError> {
        let db = self.database()?;
        let integrity = db
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("PRAGMA quick_check;", [], |row| row.get(0))
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        if integrity == "ok" {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Degraded(integrity))
        }
    }

    async fn shutdown(&self) -> Result<(), RepeaterError> {
        if self.db.get().is_some() {
            self.checkpoint().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn upsert_repeater(&self, repeater: &Repeater) -> Result<(), RepeaterError> {
        queries::repeaters::upsert_repeater(self.database()?, repeater).await
    }

    async fn get_repeater(&self, id: &str) -> Result<Option<Repeater>, RepeaterError> {
        queries::repeaters::get_repeater(self.database()?, id).await
    }

    async fn list_repeaters(&self, domain: Option<&str>) -> Result<Vec<Repeater>, RepeaterError> {
        queries::repeaters::list_repeaters(self.database()?, domain).await
    }

    async fn disable_repeater(&self, id: &str) -> Result<(), RepeaterError> {
        queries::repeaters::disable_repeater(self.database()?, id).await
    }

    async fn insert_record(&self, record: &RepeatRecord) -> Result<(), RepeaterError> {
        queries::records::insert_record(self.database()?, record).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<RepeatRecord>, RepeaterError> {
        queries::records::get_record(self.database()?, id).await
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RepeatRecord>, RepeaterError> {
        queries::records::list_records(self.database()?, filter, offset, limit).await
    }

    async fn count_records(&self, filter: &RecordFilter) -> Result<u64, RepeaterError> {
        queries::records::count_records(self.database()?, filter).await
    }

    async fn record_counts(
        &self,
        domain: Option<&str>,
        overdue_before: DateTime<Utc>,
    ) -> Result<RecordCounts, RepeaterError> {
        queries::records::record_counts(self.database()?, domain, overdue_before).await
    }

    async fn domains_with_records(&self) -> Result<Vec<String>, RepeaterError> {
        queries::records::domains_with_records(self.database()?).await
    }

    async fn select_due(
        &self,
        scope: &SelectionScope,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RepeatRecord>, RepeaterError> {
        queries::records::select_due(self.database()?, scope, now, limit).await
    }

    async fn claim(
        &self,
        record_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<ClaimedRecord>, RepeaterError> {
        queries::records::claim(self.database()?, record_id, worker_id, now, lease_until).await
    }

    async fn complete(
        &self,
        claim: &ClaimedRecord,
        transition: &Transition,
    ) -> Result<bool, RepeaterError> {
        queries::records::complete(self.database()?, claim, transition).await
    }

    async fn renew_claim(
        &self,
        claim: &ClaimedRecord,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, RepeaterError> {
        queries::records::renew_claim(self.database()?, claim, lease_until).await
    }

    async fn release(&self, claim: &ClaimedRecord) -> Result<(), RepeaterError> {
        queries::records::release(self.database()?, claim).await
    }

    async fn attempts(&self, record_id: &str) -> Result<Vec<Attempt>, RepeaterError> {
        queries::attempts::list_attempts(self.database()?, record_id).await
    }

    async fn cancel_record(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        queries::records::cancel_record(self.database()?, record_id, now).await
    }

    async fn retry_now(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        queries::records::retry_now(self.database()?, record_id, now).await
    }

    async fn resend(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RepeatRecord, RepeaterError> {
        queries::records::resend(self.database()?, record_id, now).await
    }

    async fn purge_domain(&self, domain: &str) -> Result<u64, RepeaterError> {
        queries::records::purge_domain(self.database()?, domain).await
    }
}

#[async_trait]
impl PayloadSource for SqliteStorage {
    async fn fetch(
        &self,
        domain: &str,
        payload_id: &str,
    ) -> Result<Option<Payload>, RepeaterError> {
        queries::payloads::get_payload(self.database()?, domain, payload_id).await
    }
}

#[async_trait]
impl PayloadWriteBack for SqliteStorage {
    async fn set_external_reference(
        &self,
        domain: &str,
        payload_id: &str,
        external_id: &str,
    ) -> Result<(), RepeaterError> {
        queries::payloads::set_external_id(self.database()?, domain, payload_id, external_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::RecordStore);
    }

    #[tokio::test]
    async fn initialize_opens_database_at_configured_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("init_test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::open(make_config(db_path.to_str().unwrap()))
            .await
            .unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn health_check_reports_healthy_once_open() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn shutdown_without_initialize_is_a_no_op() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("noop.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.shutdown().await.unwrap();
        assert!(!db_path.exists());
    }
}

// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `repeaters run` and `repeaters process-once`.
//!
//! Wires SQLite storage, the destination client, the worker and the
//! dispatcher together from configuration.

use std::sync::Arc;
use std::time::Duration;

use repeaters_config::model::{LoggingConfig, RepeatersConfig};
use repeaters_core::{PluginAdapter, RepeaterError};
use repeaters_delivery::{
    DestinationClient, Dispatcher, DispatcherSettings, PollReport, RetryPolicy, Worker, shutdown,
};
use repeaters_prometheus::PrometheusExporter;
use repeaters_storage::SqliteStorage;
use tracing::info;

/// Workspace crates whose events follow `logging.level`.
const CRATES: &[&str] = &[
    "repeaters",
    "repeaters_core",
    "repeaters_config",
    "repeaters_storage",
    "repeaters_delivery",
    "repeaters_prometheus",
];

pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
        EnvFilter::new(format!("warn,{}", directives.join(",")))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub async fn open_storage(config: &RepeatersConfig) -> Result<Arc<SqliteStorage>, RepeaterError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

fn build_dispatcher(
    config: &RepeatersConfig,
    storage: &Arc<SqliteStorage>,
) -> Result<Dispatcher, RepeaterError> {
    let client = DestinationClient::new(&config.http)?;
    let worker_id = config
        .scheduler
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("repeaters-{}", std::process::id()));
    let worker = Worker::new(
        storage.clone(),
        storage.clone(),
        storage.clone(),
        client,
        RetryPolicy::from_config(&config.retry),
    )
    .with_worker_id(worker_id)
    .with_claim_lease(Duration::from_secs(config.scheduler.claim_lease_secs));

    Ok(Dispatcher::new(
        storage.clone(),
        worker,
        DispatcherSettings::from_config(&config.scheduler),
    ))
}

/// Run the dispatcher until a shutdown signal arrives.
pub async fn run_daemon(config: &RepeatersConfig) -> Result<(), RepeaterError> {
    info!("starting repeaters dispatcher");

    let _exporter = if config.prometheus.enabled {
        Some(PrometheusExporter::install(&config.prometheus.listen_address)?)
    } else {
        None
    };

    let storage = open_storage(config).await?;
    let dispatcher = build_dispatcher(config, &storage)?;
    let cancel = shutdown::install_signal_handler();

    dispatcher.run(cancel).await;

    storage.shutdown().await?;
    info!("repeaters shut down cleanly");
    Ok(())
}

/// Run a single poll and print what it did.
pub async fn process_once(config: &RepeatersConfig, json: bool) -> Result<(), RepeaterError> {
    let storage = open_storage(config).await?;
    let dispatcher = build_dispatcher(config, &storage)?;
    let report = dispatcher.poll_once().await?;
    println!("{}", render_report(&report, json));
    storage.shutdown().await
}

fn render_report(report: &PollReport, json: bool) -> String {
    if json {
        let value = serde_json::json!({
            "selected": report.selected,
            "batches": report.batches,
            "skipped_repeaters": report.skipped_repeaters,
            "failed_batches": report.failed_batches,
            "full_page": report.full_page,
            "succeeded": report.records.succeeded,
            "failed": report.records.failed,
            "cancelled": report.records.cancelled,
            "skipped": report.records.skipped,
            "deferred": report.records.deferred,
        });
        return serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string());
    }
    let mut out = format!(
        "selected {} record(s) across {} repeater batch(es)\n  succeeded: {}\n  failed:    {}\n  cancelled: {}\n  deferred:  {}\n  skipped:   {}",
        report.selected,
        report.batches,
        report.records.succeeded,
        report.records.failed,
        report.records.cancelled,
        report.records.deferred,
        report.records.skipped,
    );
    if report.failed_batches > 0 {
        out.push_str(&format!("\n  {} batch(es) failed, see logs", report.failed_batches));
    }
    if report.full_page {
        out.push_str("\n  page was full, more records may be due");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use repeaters_delivery::BatchReport;

    fn report() -> PollReport {
        PollReport {
            selected: 3,
            batches: 1,
            full_page: true,
            records: BatchReport {
                succeeded: 1,
                failed: 1,
                deferred: 1,
                short_circuited: true,
                ..BatchReport::default()
            },
            ..PollReport::default()
        }
    }

    #[test]
    fn text_report_mentions_full_page() {
        let text = render_report(&report(), false);
        assert!(text.starts_with("selected 3 record(s) across 1 repeater batch(es)"));
        assert!(text.contains("deferred:  1"));
        assert!(text.contains("page was full"));
    }

    #[test]
    fn json_report_is_parseable() {
        let value: serde_json::Value =
            serde_json::from_str(&render_report(&report(), true)).unwrap();
        assert_eq!(value["selected"], 3);
        assert_eq!(value["full_page"], true);
        assert_eq!(value["deferred"], 1);
    }

    #[tokio::test]
    async fn process_once_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RepeatersConfig::default();
        config.storage.database_path = dir.path().join("r.db").to_string_lossy().to_string();
        process_once(&config, true).await.unwrap();
    }
}

// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `repeaters status` command implementation.
//!
//! Shows record counts by state, overall and per domain, plus the number of
//! records overdue by more than `scheduler.overdue_threshold_secs`.

use std::collections::BTreeMap;
use std::io::IsTerminal;

use chrono::{TimeDelta, Utc};
use repeaters_config::model::RepeatersConfig;
use repeaters_core::{HealthStatus, RecordCounts, RecordStore, RepeaterError};
use serde::Serialize;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub storage: String,
    pub total: RecordCounts,
    pub domains: BTreeMap<String, RecordCounts>,
    pub overdue_threshold_secs: u64,
}

pub async fn collect_status(
    store: &dyn RecordStore,
    config: &RepeatersConfig,
    domain: Option<&str>,
) -> Result<StatusResponse, RepeaterError> {
    let storage = match store.health_check().await? {
        HealthStatus::Healthy => "healthy".to_string(),
        HealthStatus::Degraded(reason) => format!("degraded: {reason}"),
        HealthStatus::Unhealthy(reason) => format!("unhealthy: {reason}"),
    };
    let threshold = config.scheduler.overdue_threshold_secs;
    let overdue_before = Utc::now()
        - TimeDelta::try_seconds(i64::try_from(threshold).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);

    let domains = match domain {
        Some(d) => vec![d.to_string()],
        None => store.domains_with_records().await?,
    };
    let mut per_domain = BTreeMap::new();
    for d in domains {
        let counts = store.record_counts(Some(&d), overdue_before).await?;
        per_domain.insert(d, counts);
    }
    let total = store.record_counts(domain, overdue_before).await?;

    Ok(StatusResponse {
        storage,
        total,
        domains: per_domain,
        overdue_threshold_secs: threshold,
    })
}

/// Run the `repeaters status` command.
///
/// If `--json` is passed, outputs structured JSON for scripting.
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub async fn run_status(
    store: &dyn RecordStore,
    config: &RepeatersConfig,
    domain: Option<&str>,
    json: bool,
    plain: bool,
) -> Result<(), RepeaterError> {
    let status = collect_status(store, config, domain).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }

    let use_color = !plain && std::io::stdout().is_terminal();
    println!();
    println!("  repeaters status");
    println!("  {}", "-".repeat(60));
    println!("    storage: {}", status.storage);
    print_counts("total", &status.total, use_color);
    for (d, counts) in &status.domains {
        print_counts(d, counts, use_color);
    }
    println!();
    Ok(())
}

fn counts_line(label: &str, c: &RecordCounts) -> String {
    format!(
        "    {label:<16} pending={} failure={} success={} cancelled={}",
        c.pending, c.failure, c.success, c.cancelled
    )
}

fn print_counts(label: &str, counts: &RecordCounts, use_color: bool) {
    let line = counts_line(label, counts);
    if counts.overdue == 0 {
        println!("{line}");
    } else if use_color {
        use colored::Colorize;
        println!("{line} {}", format!("overdue={}", counts.overdue).yellow());
    } else {
        println!("{line} [WARN] overdue={}", counts.overdue);
    }
}

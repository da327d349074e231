// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `repeaters records` commands.

use chrono::{DateTime, SecondsFormat, Utc};
use repeaters_core::{Attempt, RecordFilter, RecordStore, RepeatRecord, RepeaterError};

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn record_line(r: &RepeatRecord) -> String {
    format!(
        "{:<36}  {:<9}  repeater={}  payload={}  next_check={}{}",
        r.id,
        r.state,
        r.repeater_id,
        r.payload_id,
        timestamp(r.next_check),
        r.failure_reason
            .as_deref()
            .map(|reason| format!("  reason={reason}"))
            .unwrap_or_default(),
    )
}

fn attempt_line(a: &Attempt) -> String {
    format!(
        "{}  {:<9}  {:<24}  {}",
        timestamp(Some(a.attempted_at)),
        a.state,
        a.error_kind.map_or_else(|| "-".to_string(), |k| k.to_string()),
        a.message,
    )
}

pub async fn list(
    store: &dyn RecordStore,
    filter: &RecordFilter,
    offset: u64,
    limit: u64,
    json: bool,
) -> Result<(), RepeaterError> {
    let records = store.list_records(filter, offset, limit).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(());
    }
    let total = store.count_records(filter).await?;
    for record in &records {
        println!("{}", record_line(record));
    }
    println!(
        "showing {} of {total} record(s) from offset {offset}",
        records.len()
    );
    Ok(())
}

pub async fn attempts(store: &dyn RecordStore, id: &str, json: bool) -> Result<(), RepeaterError> {
    let record = store
        .get_record(id)
        .await?
        .ok_or_else(|| RepeaterError::NotFound {
            entity: "repeat record",
            id: id.to_string(),
        })?;
    let attempts = store.attempts(id).await?;
    if json {
        let value = serde_json::json!({ "record": record, "attempts": attempts });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }
    println!("{}", record_line(&record));
    if attempts.is_empty() {
        println!("  no attempts yet");
    }
    for attempt in &attempts {
        println!("  {}", attempt_line(attempt));
    }
    Ok(())
}

pub async fn cancel(store: &dyn RecordStore, id: &str) -> Result<(), RepeaterError> {
    let record = store.cancel_record(id, Utc::now()).await?;
    println!("{}", record_line(&record));
    Ok(())
}

pub async fn retry(store: &dyn RecordStore, id: &str) -> Result<(), RepeaterError> {
    let record = store.retry_now(id, Utc::now()).await?;
    println!("{}", record_line(&record));
    Ok(())
}

pub async fn purge(store: &dyn RecordStore, domain: &str) -> Result<(), RepeaterError> {
    let deleted = store.purge_domain(domain).await?;
    println!("deleted {deleted} record(s) from {domain}");
    Ok(())
}

pub async fn resend(store: &dyn RecordStore, id: &str) -> Result<(), RepeaterError> {
    let record = store.resend(id, Utc::now()).await?;
    println!("{}", record_line(&record));
    Ok(())
}

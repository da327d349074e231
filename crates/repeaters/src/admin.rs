// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeater, payload and registration commands.

use std::path::Path;

use chrono::Utc;
use repeaters_core::{Payload, PayloadType, RecordStore, Repeater, RepeaterError};
use repeaters_delivery::register_payload;
use repeaters_storage::SqliteStorage;
use serde::Deserialize;

/// A payload file holds either one payload or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadFile {
    Many(Vec<Payload>),
    One(Box<Payload>),
}

impl PayloadFile {
    fn into_vec(self) -> Vec<Payload> {
        match self {
            PayloadFile::One(payload) => vec![*payload],
            PayloadFile::Many(payloads) => payloads,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RepeaterError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RepeaterError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| RepeaterError::Config(format!("invalid JSON in {}: {e}", path.display())))
}

pub async fn register(
    store: &dyn RecordStore,
    domain: &str,
    payload_id: &str,
    payload_type: PayloadType,
    doc_type: Option<&str>,
) -> Result<(), RepeaterError> {
    let created =
        register_payload(store, domain, payload_id, payload_type, doc_type, Utc::now()).await?;
    if created.is_empty() {
        println!("no enabled repeater in {domain} accepts this payload");
    }
    for record in created {
        println!("{}  repeater={}", record.id, record.repeater_id);
    }
    Ok(())
}

pub async fn list_repeaters(
    store: &dyn RecordStore,
    domain: Option<&str>,
    json: bool,
) -> Result<(), RepeaterError> {
    let repeaters = store.list_repeaters(domain).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&repeaters).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(());
    }
    if repeaters.is_empty() {
        println!("no repeaters configured");
        return Ok(());
    }
    for r in &repeaters {
        println!(
            "{:<36}  {:<12} {:<6} {:<8} {}  {}",
            r.id,
            r.domain,
            r.kind.name(),
            if r.enabled { "enabled" } else { "disabled" },
            r.name,
            r.connection.url,
        );
    }
    Ok(())
}

pub async fn add_repeater(store: &dyn RecordStore, file: &Path) -> Result<(), RepeaterError> {
    let repeater: Repeater = read_json(file)?;
    if repeater.connection.url.trim().is_empty() {
        return Err(RepeaterError::Config(format!(
            "repeater `{}` has an empty connection url",
            repeater.name
        )));
    }
    store.upsert_repeater(&repeater).await?;
    println!("{}", repeater.id);
    Ok(())
}

pub async fn disable_repeater(store: &dyn RecordStore, id: &str) -> Result<(), RepeaterError> {
    store.disable_repeater(id).await?;
    println!("disabled repeater {id}");
    Ok(())
}

/// Store payloads in the bundled payload store, optionally registering
/// records for each of them.
pub async fn put_payloads(
    storage: &SqliteStorage,
    file: &Path,
    register: bool,
) -> Result<(), RepeaterError> {
    let payloads = read_json::<PayloadFile>(file)?.into_vec();
    for payload in &payloads {
        storage.put_payload(payload).await?;
        if register {
            let created = register_payload(
                storage,
                &payload.domain,
                &payload.id,
                payload.payload_type,
                payload.doc_type.as_deref(),
                Utc::now(),
            )
            .await?;
            println!("{}  {} record(s) registered", payload.id, created.len());
        } else {
            println!("{}", payload.id);
        }
    }
    Ok(())
}

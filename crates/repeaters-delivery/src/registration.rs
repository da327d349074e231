// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record registration for new or changed payloads.

use chrono::{DateTime, Utc};
use repeaters_core::{PayloadType, RecordStore, RepeatRecord, RepeaterError};
use tracing::debug;

/// Create one PENDING record per enabled repeater of `domain` that accepts
/// this payload. Returns the records created, in repeater order.
pub async fn register_payload(
    store: &dyn RecordStore,
    domain: &str,
    payload_id: &str,
    payload_type: PayloadType,
    doc_type: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<RepeatRecord>, RepeaterError> {
    let repeaters = store.list_repeaters(Some(domain)).await?;
    let mut created = Vec::new();
    for repeater in repeaters
        .iter()
        .filter(|r| r.accepts(payload_type, doc_type))
    {
        let record = RepeatRecord::new_pending(domain, &repeater.id, payload_id, payload_type, now);
        store.insert_record(&record).await?;
        debug!(
            record_id = %record.id,
            repeater_id = %repeater.id,
            payload_id,
            "repeat record registered"
        );
        created.push(record);
    }
    Ok(created)
}

// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundled payload store: a stand-in for the surrounding application's case
//! and form database.

use chrono::Utc;
use repeaters_core::{Payload, RepeaterError};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, json_column, map_tr_err, parsed_column, to_json, to_millis};

/// Insert or replace a payload document.
pub async fn put_payload(db: &Database, payload: &Payload) -> Result<(), RepeaterError> {
    let body = to_json(&payload.body)?;
    let payload = payload.clone();
    let now = to_millis(Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO payloads
                     (domain, payload_id, payload_type, doc_type, body, external_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(domain, payload_id) DO UPDATE SET
                     payload_type = excluded.payload_type,
                     doc_type = excluded.doc_type,
                     body = excluded.body,
                     external_id = COALESCE(excluded.external_id, payloads.external_id),
                     updated_at = excluded.updated_at",
                params![
                    payload.domain,
                    payload.id,
                    payload.payload_type.to_string(),
                    payload.doc_type,
                    body,
                    payload.external_id,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_payload(
    db: &Database,
    domain: &str,
    payload_id: &str,
) -> Result<Option<Payload>, RepeaterError> {
    let domain = domain.to_string();
    let payload_id = payload_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Payload>, rusqlite::Error> {
            conn.query_row(
                "SELECT payload_id, domain, payload_type, doc_type, body, external_id
                 FROM payloads WHERE domain = ?1 AND payload_id = ?2",
                params![domain, payload_id],
                |row| {
                    Ok(Payload {
                        id: row.get(0)?,
                        domain: row.get(1)?,
                        payload_type: parsed_column(row, 2)?,
                        doc_type: row.get(3)?,
                        body: json_column(row, 4)?,
                        external_id: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Record the destination-assigned id on a payload.
pub async fn set_external_id(
    db: &Database,
    domain: &str,
    payload_id: &str,
    external_id: &str,
) -> Result<(), RepeaterError> {
    let args = (
        domain.to_string(),
        payload_id.to_string(),
        external_id.to_string(),
    );
    let now = to_millis(Utc::now());
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE payloads SET external_id = ?3, updated_at = ?4
                 WHERE domain = ?1 AND payload_id = ?2",
                params![args.0, args.1, args.2, now],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(RepeaterError::NotFound {
            entity: "payload",
            id: payload_id.to_string(),
        });
    }
    Ok(())
}

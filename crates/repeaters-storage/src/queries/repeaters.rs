// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeater registry queries.

use chrono::Utc;
use repeaters_core::{Repeater, RepeaterError};
use rusqlite::params;

use crate::database::{Database, json_column, map_tr_err, to_json, to_millis};

const REPEATER_COLUMNS: &str =
    "id, domain, name, options, connection, payload_filter, enabled";

fn repeater_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repeater> {
    Ok(Repeater {
        id: row.get(0)?,
        domain: row.get(1)?,
        name: row.get(2)?,
        kind: json_column(row, 3)?,
        connection: json_column(row, 4)?,
        payload_filter: json_column(row, 5)?,
        enabled: row.get(6)?,
    })
}

/// Insert a repeater, or replace its settings if the id exists.
pub async fn upsert_repeater(db: &Database, repeater: &Repeater) -> Result<(), RepeaterError> {
    let id = repeater.id.clone();
    let domain = repeater.domain.clone();
    let name = repeater.name.clone();
    let kind = repeater.kind.name();
    let options = to_json(&repeater.kind)?;
    let connection = to_json(&repeater.connection)?;
    let filter = to_json(&repeater.payload_filter)?;
    let enabled = repeater.enabled;
    let now = to_millis(Utc::now());

    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO repeaters
                     (id, domain, name, kind, options, connection, payload_filter, enabled,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     domain = excluded.domain,
                     name = excluded.name,
                     kind = excluded.kind,
                     options = excluded.options,
                     connection = excluded.connection,
                     payload_filter = excluded.payload_filter,
                     enabled = excluded.enabled,
                     updated_at = excluded.updated_at",
                params![id, domain, name, kind, options, connection, filter, enabled, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_repeater(db: &Database, id: &str) -> Result<Option<Repeater>, RepeaterError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPEATER_COLUMNS} FROM repeaters WHERE id = ?1"
            ))?;
            match stmt.query_row(params![id], repeater_from_row) {
                Ok(repeater) => Ok(Some(repeater)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// List repeaters ordered by domain then name, including disabled ones.
pub async fn list_repeaters(
    db: &Database,
    domain: Option<&str>,
) -> Result<Vec<Repeater>, RepeaterError> {
    let domain = domain.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPEATER_COLUMNS} FROM repeaters
                 WHERE ?1 IS NULL OR domain = ?1
                 ORDER BY domain, name, id"
            ))?;
            let rows = stmt.query_map(params![domain], repeater_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Soft-delete. Returns `NotFound` if the id does not exist.
pub async fn disable_repeater(db: &Database, id: &str) -> Result<(), RepeaterError> {
    let id_owned = id.to_string();
    let now = to_millis(Utc::now());
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE repeaters SET enabled = 0, updated_at = ?2 WHERE id = ?1",
                params![id_owned, now],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(RepeaterError::NotFound {
            entity: "repeater",
            id: id.to_string(),
        });
    }
    Ok(())
}

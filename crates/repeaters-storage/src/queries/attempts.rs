// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only attempt log.
//!
//! Rows are only ever inserted inside the same transaction that changes the
//! parent record's state; there is no update or delete path besides the
//! cascade from `repeat_records`.

use chrono::{DateTime, Utc};
use repeaters_core::{Attempt, ErrorKind, RecordState, RepeaterError};
use rusqlite::params;

use crate::database::{Database, map_tr_err, millis_column, parsed_column, to_millis};

pub(crate) fn insert_attempt_row(
    conn: &rusqlite::Connection,
    record_id: &str,
    attempted_at: DateTime<Utc>,
    state: RecordState,
    error_kind: Option<ErrorKind>,
    message: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO attempts (record_id, attempted_at, state, error_kind, message)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record_id,
            to_millis(attempted_at),
            state.to_string(),
            error_kind.map(|k| k.to_string()),
            message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn attempt_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attempt> {
    let error_kind = match row.get::<_, Option<String>>(4)? {
        Some(_) => Some(parsed_column::<ErrorKind>(row, 4)?),
        None => None,
    };
    Ok(Attempt {
        id: row.get(0)?,
        record_id: row.get(1)?,
        attempted_at: millis_column(row, 2)?,
        state: parsed_column(row, 3)?,
        error_kind,
        message: row.get(5)?,
    })
}

/// All attempts of one record, oldest first.
pub async fn list_attempts(db: &Database, record_id: &str) -> Result<Vec<Attempt>, RepeaterError> {
    let record_id = record_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<Attempt>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, record_id, attempted_at, state, error_kind, message
                 FROM attempts WHERE record_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![record_id], attempt_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_attempts(db: &Database, record_id: &str) -> Result<u32, RepeaterError> {
    let record_id = record_id.to_string();
    let n = db
        .connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM attempts WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}
